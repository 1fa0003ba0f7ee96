//! Dispatch loop: one task per wired kind, pumping its subscription through the
//! handler table into the outbound sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pulse_core::source::{ChangeSource, SourceEvent, Subscription};
use pulse_core::store::ResourceStore;
use pulse_core::{Outcome, ResourceKindTag, WatchError};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WatchConfig;
use crate::handlers::{Context, HandlerTable};
use crate::sink::OutboundSink;

/// Per-watcher event counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    emitted: AtomicU64,
    suppressed: AtomicU64,
    ignored: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub emitted: u64,
    pub suppressed: u64,
    pub ignored: u64,
    pub failed: u64,
    /// Translated but refused by a closed sink.
    pub rejected: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A running set of per-kind dispatch tasks.
pub struct Watcher {
    id: Uuid,
    shutdown: watch::Sender<bool>,
    tasks: Vec<(ResourceKindTag, JoinHandle<()>)>,
    unwired: Vec<ResourceKindTag>,
    stats: Arc<DispatchStats>,
    sink: OutboundSink,
    grace: Duration,
}

struct KindTask {
    kind: ResourceKindTag,
    table: Arc<HandlerTable>,
    ctx: Context,
    sink: OutboundSink,
    stats: Arc<DispatchStats>,
}

impl Watcher {
    /// Subscribe every kind in `table` and spawn its dispatch task.
    ///
    /// Subscriptions are set up concurrently, each bounded by `cfg.setup_timeout`.
    /// A kind whose subscription cannot be established in time is logged, left
    /// unwired and reported by [`Watcher::unwired`]; the remaining kinds still start.
    pub async fn start(
        source: Arc<dyn ChangeSource>,
        store: Arc<dyn ResourceStore>,
        table: HandlerTable,
        sink: OutboundSink,
        cfg: &WatchConfig,
    ) -> Self {
        let id = Uuid::new_v4();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(DispatchStats::default());
        let ctx = Context::new(store, cfg.policy.clone());
        let kinds = table.kinds();
        let table = Arc::new(table);
        let mut tasks = Vec::with_capacity(kinds.len());
        let mut unwired = Vec::new();
        let (buffer, limit) = (cfg.subscription_buffer, cfg.setup_timeout);
        let setups = kinds.into_iter().map(|kind| {
            let source = source.clone();
            async move {
                let res = match tokio::time::timeout(limit, source.subscribe(kind, buffer)).await {
                    Ok(res) => res,
                    Err(_) => Err(WatchError::Setup { kind, reason: format!("no response within {:?}", limit) }),
                };
                (kind, res)
            }
        });
        for (kind, res) in futures::future::join_all(setups).await {
            match res {
                Ok(sub) => {
                    let task = KindTask { kind, table: table.clone(), ctx: ctx.clone(), sink: sink.clone(), stats: stats.clone() };
                    tasks.push((kind, tokio::spawn(task.run(sub, shutdown_rx.clone()))));
                    info!(watcher = %id, kind = %kind, "kind wired");
                }
                Err(e) => {
                    error!(watcher = %id, kind = %kind, error = %e, "subscription failed; kind not wired");
                    metrics::counter!("pulse_subscriptions_failed_total", 1u64, "kind" => kind.to_string());
                    unwired.push(kind);
                }
            }
        }
        info!(watcher = %id, wired = tasks.len(), unwired = unwired.len(), "watcher started");
        Self { id, shutdown, tasks, unwired, stats, sink, grace: cfg.stop_grace }
    }

    pub fn id(&self) -> Uuid { self.id }

    pub fn wired(&self) -> Vec<ResourceKindTag> { self.tasks.iter().map(|(k, _)| *k).collect() }

    pub fn unwired(&self) -> &[ResourceKindTag] { &self.unwired }

    pub fn stats(&self) -> StatsSnapshot { self.stats.snapshot() }

    pub fn sink(&self) -> &OutboundSink { &self.sink }

    /// Signal every task, wait up to the grace period, abort the rest.
    ///
    /// The sink stays open; closing it is up to the consumer side.
    pub async fn stop(self) -> StatsSnapshot {
        let _ = self.shutdown.send(true);
        let deadline = tokio::time::Instant::now() + self.grace;
        let mut aborted = 0usize;
        for (kind, mut handle) in self.tasks {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(watcher = %self.id, kind = %kind, "dispatch task did not stop in time; aborting");
                handle.abort();
                aborted += 1;
            }
        }
        let stats = self.stats.snapshot();
        info!(watcher = %self.id, aborted, received = stats.received, emitted = stats.emitted, failed = stats.failed, "watcher stopped");
        stats
    }
}

impl KindTask {
    async fn run(self, sub: Subscription, mut shutdown: watch::Receiver<bool>) {
        let Subscription { mut rx, cancel } = sub;
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                ev = rx.recv() => ev,
            };
            let Some(ev) = next else {
                debug!(kind = %self.kind, "subscription closed");
                break;
            };
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = self.handle(ev) => {}
            }
        }
        cancel.cancel();
        info!(kind = %self.kind, "kind stopped");
    }

    async fn handle(&self, ev: SourceEvent) {
        DispatchStats::bump(&self.stats.received);
        let t0 = Instant::now();
        let result = self.table.translate(&self.ctx, self.kind, ev.action, &ev.object).await;
        metrics::histogram!("pulse_translate_ms", t0.elapsed().as_secs_f64() * 1000.0, "kind" => self.kind.to_string());
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                DispatchStats::bump(&self.stats.failed);
                metrics::counter!("pulse_events_total", 1u64, "kind" => self.kind.to_string(), "outcome" => "failed");
                warn!(
                    kind = %self.kind,
                    action = %ev.action,
                    object = %ev.object.display_key(),
                    class = e.class(),
                    error = %e,
                    "translate failed; event dropped"
                );
                return;
            }
        };
        let mut label = outcome.label();
        match outcome {
            Outcome::Emit(msg) if !msg.is_empty() => {
                if self.sink.push(msg) {
                    DispatchStats::bump(&self.stats.emitted);
                } else {
                    DispatchStats::bump(&self.stats.rejected);
                    label = "rejected";
                    debug!(kind = %self.kind, "sink closed; message discarded");
                }
            }
            Outcome::Emit(_) | Outcome::Suppressed => {
                DispatchStats::bump(&self.stats.suppressed);
                debug!(kind = %self.kind, action = %ev.action, object = %ev.object.display_key(), "suppressed");
            }
            Outcome::Ignored => DispatchStats::bump(&self.stats.ignored),
        }
        metrics::counter!("pulse_events_total", 1u64, "kind" => self.kind.to_string(), "outcome" => label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{fixture, MockSource, MockStore};
    use pulse_core::Action;

    #[tokio::test]
    async fn events_flow_from_source_to_sink() {
        let source = Arc::new(MockSource::new());
        let tx = source.sender(ResourceKindTag::Node);
        tx.send(SourceEvent::new(Action::Add, fixture::node("n1"))).await.unwrap();
        tx.send(SourceEvent::new(Action::Delete, fixture::node("n1"))).await.unwrap();
        let sink = OutboundSink::with_capacity(16);
        let table = HandlerTable::standard().retain_kinds(&[ResourceKindTag::Node]);
        let w = Watcher::start(source.clone(), Arc::new(MockStore::new()), table, sink.clone(), &WatchConfig::default()).await;
        assert_eq!(w.wired(), vec![ResourceKindTag::Node]);
        let a = sink.recv().await.unwrap();
        let b = sink.recv().await.unwrap();
        assert_eq!((a.action.as_str(), b.action.as_str()), ("Add", "Delete"));
        let stats = w.stop().await;
        assert_eq!(stats.emitted, 2);
        assert!(source.released(ResourceKindTag::Node));
    }

    #[tokio::test]
    async fn ignored_and_suppressed_are_counted_separately() {
        let source = Arc::new(MockSource::new());
        let sso = source.sender(ResourceKindTag::SingleSignOnConfig);
        sso.send(SourceEvent::new(Action::Add, fixture::sso("kalm-system", "other"))).await.unwrap();
        let pods = source.sender(ResourceKindTag::Pod);
        pods.send(SourceEvent::new(Action::Add, fixture::pod("ns1", "p", None))).await.unwrap();
        drop((sso, pods));
        let table = HandlerTable::standard().retain_kinds(&[ResourceKindTag::SingleSignOnConfig, ResourceKindTag::Pod]);
        let w = Watcher::start(source, Arc::new(MockStore::new()), table, OutboundSink::default(), &WatchConfig::default()).await;
        for _ in 0..100 {
            if w.stats().received == 2 && w.stats().suppressed + w.stats().ignored == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let stats = w.stop().await;
        assert_eq!((stats.suppressed, stats.ignored, stats.failed, stats.emitted), (1, 1, 0, 0));
    }

    #[tokio::test]
    async fn closed_sink_counts_rejected_not_emitted() {
        let source = Arc::new(MockSource::new());
        let tx = source.sender(ResourceKindTag::Node);
        tx.send(SourceEvent::new(Action::Add, fixture::node("n1"))).await.unwrap();
        drop(tx);
        let sink = OutboundSink::with_capacity(4);
        sink.close();
        let table = HandlerTable::standard().retain_kinds(&[ResourceKindTag::Node]);
        let w = Watcher::start(source, Arc::new(MockStore::new()), table, sink.clone(), &WatchConfig::default()).await;
        for _ in 0..100 {
            if w.stats().rejected == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let stats = w.stop().await;
        assert_eq!((stats.received, stats.emitted, stats.rejected), (1, 0, 1));
        assert!(sink.is_empty());
    }
}
