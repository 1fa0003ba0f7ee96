use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use pulse_core::{Message, ResourceKindTag};
use pulse_engine::{HandlerTable, OutboundSink, WatchConfig, Watcher};
use pulse_kubehub::{KubeSource, KubeStore};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "pulsed", version, about = "Watch Kalm resources and stream change messages")]
struct Cli {
    /// Kinds to watch, comma separated (kind or plural, e.g. "pods,Component"). Default: all
    #[arg(long = "kinds", env = "PULSE_KINDS", value_delimiter = ',')]
    kinds: Vec<String>,

    /// Outbound queue capacity (overrides PULSE_SINK_CAP)
    #[arg(long = "sink-cap")]
    sink_cap: Option<usize>,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Human)]
    output: Output,

    /// Prometheus exporter listen address, host:port
    #[arg(long = "metrics-addr", env = "PULSE_METRICS_ADDR")]
    metrics_addr: Option<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

fn init_tracing() {
    let env = std::env::var("PULSE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics(addr: Option<&str>) {
    let Some(addr) = addr else { return };
    match addr.parse::<std::net::SocketAddr>() {
        Ok(sock) => match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
            Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
            Err(e) => warn!(error = %e, "failed to install metrics exporter"),
        },
        Err(_) => warn!(addr = %addr, "invalid metrics address; expected host:port"),
    }
}

fn parse_kinds(names: &[String]) -> Result<Vec<ResourceKindTag>> {
    if names.is_empty() {
        return Ok(ResourceKindTag::ALL.to_vec());
    }
    let mut kinds = names
        .iter()
        .map(|n| ResourceKindTag::from_str(n.trim()).with_context(|| format!("--kinds: {}", n)))
        .collect::<Result<Vec<_>>>()?;
    kinds.sort_unstable();
    kinds.dedup();
    Ok(kinds)
}

fn render(msg: &Message, output: Output) -> Result<String> {
    Ok(match output {
        Output::Json => serde_json::to_string(msg)?,
        Output::Human => {
            let ns = if msg.namespace.is_empty() { "-" } else { msg.namespace.as_str() };
            let name = msg.data.as_ref().and_then(|d| d.get("name")).and_then(|v| v.as_str()).unwrap_or("-");
            format!("{:<7} {:<18} {:<16} {}", msg.action, msg.kind, ns, name)
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    init_metrics(cli.metrics_addr.as_deref());

    let mut cfg = WatchConfig::from_env();
    if let Some(cap) = cli.sink_cap {
        cfg.sink_capacity = cap.max(1);
    }
    let kinds = parse_kinds(&cli.kinds)?;
    info!(kinds = ?kinds, sink_cap = cfg.sink_capacity, "pulsed starting");

    let client = pulse_kubehub::default_client().await?;
    let source = Arc::new(KubeSource::new(client.clone()));
    let store = Arc::new(
        KubeStore::new(client)
            .with_system_namespace(cfg.policy.system_namespace.clone())
            .with_component_label(cfg.policy.component_label.clone()),
    );
    let sink = OutboundSink::with_capacity(cfg.sink_capacity);
    let table = HandlerTable::standard().retain_kinds(&kinds);

    let watcher = Watcher::start(source, store, table, sink.clone(), &cfg).await;
    if watcher.wired().is_empty() {
        anyhow::bail!("no kind could be watched (unwired: {:?})", watcher.unwired());
    }

    let printer = tokio::spawn({
        let sink = sink.clone();
        let output = cli.output;
        async move {
            while let Some(msg) = sink.recv().await {
                match render(&msg, output) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(error = %e, kind = %msg.kind, "failed to render message"),
                }
            }
        }
    });

    signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutdown requested");
    let stats = watcher.stop().await;
    sink.close();
    if let Err(e) = printer.await {
        warn!(error = %e, "printer task failed");
    }
    info!(
        received = stats.received,
        emitted = stats.emitted,
        suppressed = stats.suppressed,
        ignored = stats.ignored,
        failed = stats.failed,
        rejected = stats.rejected,
        dropped = sink.dropped(),
        "pulsed stopped"
    );
    Ok(())
}
