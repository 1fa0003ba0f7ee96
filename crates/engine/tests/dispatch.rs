use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pulse_core::source::SourceEvent;
use pulse_core::{Action, Message, ObjectRef, RawObject, ResourceKindTag};
use pulse_engine::mock::{fixture, MockSource, MockStore};
use pulse_engine::{HandlerTable, OutboundSink, WatchConfig, Watcher};

fn cfg() -> WatchConfig {
    WatchConfig { stop_grace: Duration::from_millis(300), ..WatchConfig::default() }
}

async fn start(source: &Arc<MockSource>, store: &Arc<MockStore>, kinds: &[ResourceKindTag]) -> (Watcher, OutboundSink) {
    let sink = OutboundSink::with_capacity(4096);
    let table = HandlerTable::standard().retain_kinds(kinds);
    let w = Watcher::start(source.clone(), store.clone(), table, sink.clone(), &cfg()).await;
    (w, sink)
}

async fn wait_received(w: &Watcher, n: u64) {
    for _ in 0..400 {
        if w.stats().received >= n {
            let s = w.stats();
            if s.emitted + s.suppressed + s.ignored + s.failed + s.rejected >= n {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {} events, stats {:?}", n, w.stats());
}

async fn next(sink: &OutboundSink) -> Message {
    tokio::time::timeout(Duration::from_secs(2), sink.recv()).await.expect("message in time").expect("sink open")
}

#[tokio::test]
async fn owned_service_update_reports_component() {
    let source = Arc::new(MockSource::new());
    let store = Arc::new(MockStore::new());
    store.insert(fixture::component("ns1", "web"));
    store.insert(fixture::service("ns1", "web", Some("web")));
    source
        .sender(ResourceKindTag::Service)
        .send(SourceEvent::new(Action::Update, fixture::service("ns1", "web", Some("web"))))
        .await
        .unwrap();
    let (w, sink) = start(&source, &store, &[ResourceKindTag::Service]).await;
    let msg = next(&sink).await;
    assert_eq!((msg.namespace.as_str(), msg.kind.as_str(), msg.action.as_str()), ("ns1", "Component", "Update"));
    let data = msg.data.unwrap();
    assert_eq!(data["name"], "web");
    assert_eq!(data["services"][0]["name"], "web");
    w.stop().await;
}

#[tokio::test]
async fn kube_system_namespace_yields_nothing() {
    let source = Arc::new(MockSource::new());
    let store = Arc::new(MockStore::new());
    source
        .sender(ResourceKindTag::Namespace)
        .send(SourceEvent::new(Action::Add, fixture::namespace("kube-system", false)))
        .await
        .unwrap();
    let (w, sink) = start(&source, &store, &[ResourceKindTag::Namespace]).await;
    wait_received(&w, 1).await;
    let stats = w.stop().await;
    assert!(sink.is_empty());
    assert_eq!((stats.suppressed, stats.failed), (1, 0));
}

#[tokio::test]
async fn suppression_predicates_never_fail() {
    let source = Arc::new(MockSource::new());
    let store = Arc::new(MockStore::new());
    let events = [
        (ResourceKindTag::Namespace, fixture::namespace("plain", false)),
        (ResourceKindTag::Namespace, fixture::namespace("kalm-system", true)),
        (ResourceKindTag::Pod, fixture::pod("ns1", "orphan", None)),
        (ResourceKindTag::PersistentVolumeClaim, fixture::pvc("ns1", "scratch", "pv-9", false)),
    ];
    for (kind, obj) in events.iter().cloned() {
        source.sender(kind).send(SourceEvent::new(Action::Add, obj)).await.unwrap();
    }
    let kinds = [ResourceKindTag::Namespace, ResourceKindTag::Pod, ResourceKindTag::PersistentVolumeClaim];
    let (w, sink) = start(&source, &store, &kinds).await;
    wait_received(&w, events.len() as u64).await;
    let stats = w.stop().await;
    assert!(sink.is_empty());
    assert_eq!((stats.suppressed, stats.failed), (4, 0));
    assert!(store.lookup_log().is_empty());
}

#[tokio::test]
async fn pod_changes_update_owner_for_every_action() {
    let source = Arc::new(MockSource::new());
    let store = Arc::new(MockStore::new());
    store.insert(fixture::component("shop", "api"));
    let tx = source.sender(ResourceKindTag::Pod);
    for action in [Action::Add, Action::Update, Action::Delete] {
        tx.send(SourceEvent::new(action, fixture::pod("shop", "api-0", Some("api")))).await.unwrap();
    }
    let (w, sink) = start(&source, &store, &[ResourceKindTag::Pod]).await;
    for _ in 0..3 {
        let msg = next(&sink).await;
        assert_eq!((msg.namespace.as_str(), msg.kind.as_str(), msg.action.as_str()), ("shop", "Component", "Update"));
    }
    w.stop().await;
    assert_eq!(store.lookup_log().len(), 3);
}

#[tokio::test]
async fn pvc_delete_skips_volume_lookup() {
    let source = Arc::new(MockSource::new());
    let store = Arc::new(MockStore::new());
    source
        .sender(ResourceKindTag::PersistentVolumeClaim)
        .send(SourceEvent::new(Action::Delete, fixture::pvc("ns1", "data", "pv-1", true)))
        .await
        .unwrap();
    let (w, sink) = start(&source, &store, &[ResourceKindTag::PersistentVolumeClaim]).await;
    let msg = next(&sink).await;
    assert_eq!((msg.kind.as_str(), msg.action.as_str()), ("Volume", "Delete"));
    assert_eq!(msg.data.unwrap()["pv"], "");
    w.stop().await;
    assert!(store.lookup_log().iter().all(|r| r != &ObjectRef::persistent_volume("pv-1")));
}

#[tokio::test]
async fn failing_event_does_not_stop_its_kind() {
    let source = Arc::new(MockSource::new());
    let store = Arc::new(MockStore::new());
    let tx = source.sender(ResourceKindTag::Pod);
    tx.send(SourceEvent::new(Action::Add, fixture::pod("ns1", "p0", Some("missing")))).await.unwrap();
    tx.send(SourceEvent::new(Action::Add, fixture::malformed())).await.unwrap();
    store.insert(fixture::component("ns1", "web"));
    tx.send(SourceEvent::new(Action::Add, fixture::pod("ns1", "p1", Some("web")))).await.unwrap();
    let (w, sink) = start(&source, &store, &[ResourceKindTag::Pod]).await;
    let msg = next(&sink).await;
    assert_eq!(msg.data.unwrap()["name"], "web");
    let stats = w.stop().await;
    assert_eq!((stats.failed, stats.emitted), (2, 1));
}

#[tokio::test]
async fn setup_failure_leaves_other_kinds_running() {
    let source = Arc::new(MockSource::new());
    let store = Arc::new(MockStore::new());
    source.fail(ResourceKindTag::DeployKey);
    source
        .sender(ResourceKindTag::Node)
        .send(SourceEvent::new(Action::Add, fixture::node("n1")))
        .await
        .unwrap();
    let (w, sink) = start(&source, &store, &[ResourceKindTag::DeployKey, ResourceKindTag::Node]).await;
    assert_eq!(w.unwired(), &[ResourceKindTag::DeployKey]);
    assert_eq!(w.wired(), vec![ResourceKindTag::Node]);
    assert_eq!(next(&sink).await.kind, "Node");
    w.stop().await;
}

#[tokio::test]
async fn unresponsive_setup_does_not_block_other_kinds() {
    let source = Arc::new(MockSource::new());
    let store = Arc::new(MockStore::new());
    source.hang(ResourceKindTag::Namespace);
    source
        .sender(ResourceKindTag::Node)
        .send(SourceEvent::new(Action::Add, fixture::node("n1")))
        .await
        .unwrap();
    let cfg = WatchConfig { setup_timeout: Duration::from_millis(200), ..cfg() };
    let sink = OutboundSink::with_capacity(16);
    let table = HandlerTable::standard().retain_kinds(&[ResourceKindTag::Namespace, ResourceKindTag::Node]);
    let w = tokio::time::timeout(
        Duration::from_secs(2),
        Watcher::start(source.clone(), store.clone(), table, sink.clone(), &cfg),
    )
    .await
    .expect("start must return despite a hung subscription");
    assert_eq!(w.unwired(), &[ResourceKindTag::Namespace]);
    assert_eq!(w.wired(), vec![ResourceKindTag::Node]);
    let msg = next(&sink).await;
    assert_eq!((msg.kind.as_str(), msg.action.as_str()), ("Node", "Add"));
    w.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_lookups_do_not_block_other_kinds() {
    let source = Arc::new(MockSource::new());
    let store = Arc::new(MockStore::new());
    store.insert(fixture::component("ns1", "web"));
    store.delay("Component", Duration::from_secs(30));
    source
        .sender(ResourceKindTag::Pod)
        .send(SourceEvent::new(Action::Add, fixture::pod("ns1", "web-0", Some("web"))))
        .await
        .unwrap();
    let nodes = source.sender(ResourceKindTag::Node);
    let (w, sink) = start(&source, &store, &[ResourceKindTag::Pod, ResourceKindTag::Node]).await;
    // give the pod lookup time to start hanging
    tokio::time::sleep(Duration::from_millis(50)).await;
    nodes.send(SourceEvent::new(Action::Update, fixture::node("n1"))).await.unwrap();
    let msg = next(&sink).await;
    assert_eq!(msg.kind, "Node");

    // stop races the hung lookup and returns well before the delay elapses
    let stopped = tokio::time::timeout(Duration::from_secs(5), w.stop()).await.expect("stop must not hang");
    assert_eq!(stopped.emitted, 1);
    assert!(source.released(ResourceKindTag::Pod));
    assert!(source.released(ResourceKindTag::Node));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_burst_keeps_per_kind_order() {
    const KINDS: [ResourceKindTag; 5] = [
        ResourceKindTag::Node,
        ResourceKindTag::HttpRoute,
        ResourceKindTag::ProtectedEndpoint,
        ResourceKindTag::DeployKey,
        ResourceKindTag::HttpsCert,
    ];
    let source = Arc::new(MockSource::new());
    let store = Arc::new(MockStore::new());
    let senders: Vec<_> = KINDS.iter().map(|k| (*k, source.sender(*k))).collect();
    let (w, sink) = start(&source, &store, &KINDS).await;

    let burst = async_stream::stream! {
        for i in 0..1000usize {
            let kind = KINDS[i % KINDS.len()];
            let name = format!("obj-{:04}", i);
            let obj: RawObject = if (i / KINDS.len()) % 10 == 7 {
                fixture::malformed()
            } else if kind == ResourceKindTag::Node {
                fixture::node(&name)
            } else if kind.namespaced() {
                fixture::custom(kind, Some("ns1"), &name)
            } else {
                fixture::custom(kind, None, &name)
            };
            yield (kind, SourceEvent::new(Action::Update, obj));
        }
    };
    futures::pin_mut!(burst);
    let mut sent = 0u64;
    while let Some((kind, ev)) = burst.next().await {
        let tx = &senders.iter().find(|(k, _)| *k == kind).unwrap().1;
        tx.send(ev).await.unwrap();
        sent += 1;
    }
    wait_received(&w, sent).await;
    let stats = w.stop().await;
    sink.close();

    let mut out = Vec::new();
    while let Some(m) = sink.recv().await {
        out.push(m);
    }
    assert!(out.len() as u64 <= sent);
    assert_eq!(out.len() as u64, stats.emitted);
    assert_eq!(stats.failed, 100);
    for kind in ["Node", "HttpRoute", "ProtectedEndpoint", "DeployKey", "HttpsCert"] {
        let names: Vec<String> = out
            .iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.data.as_ref().unwrap()["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names.len(), 180, "{kind}");
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted, "{kind} out of order");
    }
}
