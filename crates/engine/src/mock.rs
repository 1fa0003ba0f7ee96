//! In-memory collaborators for tests and local runs without a cluster.

use std::sync::Mutex;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service};
use kube::core::DynamicObject;
use pulse_core::source::{CancelHandle, ChangeSource, SourceEvent, Subscription};
use pulse_core::store::ResourceStore;
use pulse_core::{labels, views, ObjectRef, RawObject, ResourceKindTag, WatchError, WatchResult};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::{mpsc, oneshot};

type Key = (String, Option<String>, String);

fn key_of(kind: &str, namespace: Option<&str>, name: &str) -> Key {
    (kind.to_string(), namespace.map(|s| s.to_string()), name.to_string())
}

/// Store backed by a map of objects keyed by kind, namespace and name.
///
/// Every `get` is recorded, and can be slowed down per kind to simulate a
/// lagging API server.
#[derive(Default)]
pub struct MockStore {
    objects: Mutex<FxHashMap<Key, RawObject>>,
    lookups: Mutex<Vec<ObjectRef>>,
    delays: Mutex<FxHashMap<String, Duration>>,
    system_namespace: String,
    component_label: String,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            system_namespace: labels::SYSTEM_NAMESPACE.to_string(),
            component_label: labels::COMPONENT.to_string(),
            ..Default::default()
        }
    }

    /// Label that ties pods and services to their component.
    pub fn with_component_label(mut self, label: impl Into<String>) -> Self {
        self.component_label = label.into();
        self
    }

    pub fn insert(&self, obj: RawObject) {
        let key = key_of(obj.kind().unwrap_or_default(), obj.namespace(), obj.name().unwrap_or_default());
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).insert(key, obj);
    }

    pub fn remove(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<RawObject> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).remove(&key_of(kind, namespace, name))
    }

    /// Make every `get` of `kind` take `delay` first.
    pub fn delay(&self, kind: &str, delay: Duration) {
        self.delays.lock().unwrap_or_else(|e| e.into_inner()).insert(kind.to_string(), delay);
    }

    /// Targets of all `get` calls so far, in call order.
    pub fn lookup_log(&self) -> Vec<ObjectRef> {
        self.lookups.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn find(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<RawObject> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).get(&key_of(kind, namespace, name)).cloned()
    }

    fn list<T: serde::de::DeserializeOwned>(&self, kind: &str, mut pred: impl FnMut(&RawObject) -> bool) -> WatchResult<Vec<T>> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let mut matched: Vec<_> = objects.iter().filter(|((k, _, _), o)| k == kind && pred(o)).collect();
        matched.sort_by(|a, b| a.0.cmp(b.0));
        matched
            .into_iter()
            .map(|(_, o)| o.decode_named::<T>(kind).map_err(|e| WatchError::Lookup(format!("{}: {}", kind, e))))
            .collect()
    }
}

#[async_trait::async_trait]
impl ResourceStore for MockStore {
    async fn get(&self, target: &ObjectRef) -> WatchResult<RawObject> {
        self.lookups.lock().unwrap_or_else(|e| e.into_inner()).push(target.clone());
        let delay = self.delays.lock().unwrap_or_else(|e| e.into_inner()).get(&target.kind).copied();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        self.find(&target.kind, target.namespace.as_deref(), &target.name)
            .ok_or_else(|| WatchError::NotFound(target.to_string()))
    }

    async fn application_details(&self, namespace: &Namespace) -> WatchResult<serde_json::Value> {
        let name = namespace.metadata.name.as_deref().unwrap_or_default();
        let components: Vec<DynamicObject> = self.list("Component", |o| o.namespace() == Some(name))?;
        views::application(namespace, &components)
    }

    async fn component_details(&self, component: &DynamicObject) -> WatchResult<serde_json::Value> {
        let ns = component.metadata.namespace.as_deref();
        let name = component.metadata.name.as_deref();
        let owned = |o: &RawObject| o.namespace() == ns && o.label(&self.component_label) == name;
        let pods: Vec<Pod> = self.list("Pod", owned)?;
        let services: Vec<Service> = self.list("Service", owned)?;
        views::component_details(component, &pods, &services)
    }

    async fn registry_details(&self, registry: &DynamicObject) -> WatchResult<serde_json::Value> {
        let secret_name = labels::registry_secret_name(registry.metadata.name.as_deref().unwrap_or_default());
        let username = match self.find("Secret", Some(self.system_namespace.as_str()), &secret_name) {
            Some(raw) => raw
                .decode_named::<Secret>("Secret")
                .map_err(|e| WatchError::Lookup(format!("Secret {}: {}", secret_name, e)))?
                .data
                .and_then(|d| d.get("username").map(|b| String::from_utf8_lossy(&b.0).into_owned())),
            None => None,
        };
        Ok(views::registry(registry, username.as_deref()))
    }

    async fn sso_details(&self, config: &DynamicObject) -> WatchResult<serde_json::Value> {
        let name = config.metadata.name.as_deref().unwrap_or(labels::SSO_NAME);
        let ns = config.metadata.namespace.as_deref().unwrap_or(self.system_namespace.as_str());
        let target = ObjectRef::of(ResourceKindTag::SingleSignOnConfig, Some(ns), name);
        let current: DynamicObject = self.get(&target).await?.decode(ResourceKindTag::SingleSignOnConfig)?;
        Ok(views::sso_config(&current))
    }
}

/// Scriptable change source. Tests feed events per kind through [`MockSource::sender`].
#[derive(Default)]
pub struct MockSource {
    pending: Mutex<FxHashMap<ResourceKindTag, (mpsc::Sender<SourceEvent>, mpsc::Receiver<SourceEvent>)>>,
    failing: Mutex<FxHashSet<ResourceKindTag>>,
    hanging: Mutex<FxHashSet<ResourceKindTag>>,
    cancels: Mutex<FxHashMap<ResourceKindTag, oneshot::Receiver<()>>>,
    // keeps channels of kinds nobody fed open until the subscription is released
    idle: Mutex<Vec<mpsc::Sender<SourceEvent>>>,
}

impl MockSource {
    pub fn new() -> Self { Self::default() }

    /// Sender feeding the subscription of `kind`. Events sent before `subscribe`
    /// are buffered (up to 4096).
    pub fn sender(&self, kind: ResourceKindTag) -> mpsc::Sender<SourceEvent> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.entry(kind).or_insert_with(|| mpsc::channel(4096)).0.clone()
    }

    /// Make `subscribe(kind)` fail with a setup error.
    pub fn fail(&self, kind: ResourceKindTag) {
        self.failing.lock().unwrap_or_else(|e| e.into_inner()).insert(kind);
    }

    /// Make `subscribe(kind)` never return, like a list against an unresponsive API.
    pub fn hang(&self, kind: ResourceKindTag) {
        self.hanging.lock().unwrap_or_else(|e| e.into_inner()).insert(kind);
    }

    /// Whether the subscription of `kind` has been cancelled (or its handle dropped).
    pub fn released(&self, kind: ResourceKindTag) -> bool {
        let mut cancels = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
        match cancels.get_mut(&kind) {
            Some(rx) => !matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)),
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl ChangeSource for MockSource {
    async fn subscribe(&self, kind: ResourceKindTag, _buffer: usize) -> WatchResult<Subscription> {
        if self.failing.lock().unwrap_or_else(|e| e.into_inner()).contains(&kind) {
            return Err(WatchError::Setup { kind, reason: "forbidden".into() });
        }
        let hangs = self.hanging.lock().unwrap_or_else(|e| e.into_inner()).contains(&kind);
        if hangs {
            std::future::pending::<()>().await;
        }
        let taken = self.pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&kind);
        let rx = match taken {
            // the stored sender is dropped here, so the stream ends once all handed-out senders are gone
            Some((_tx, rx)) => rx,
            None => {
                let (tx, rx) = mpsc::channel(1);
                self.idle.lock().unwrap_or_else(|e| e.into_inner()).push(tx);
                rx
            }
        };
        let (cancel, cancel_rx) = CancelHandle::pair();
        self.cancels.lock().unwrap_or_else(|e| e.into_inner()).insert(kind, cancel_rx);
        Ok(Subscription { rx, cancel })
    }
}

/// Object builders in the shape the API server returns them.
pub mod fixture {
    use pulse_core::{labels, RawObject, ResourceKindTag};
    use serde_json::{json, Map, Value};

    fn labels_of(pairs: &[(&str, &str)]) -> Value {
        Value::Object(pairs.iter().map(|(k, v)| (k.to_string(), Value::String(v.to_string()))).collect::<Map<_, _>>())
    }

    fn meta(namespace: Option<&str>, name: &str, labels: &[(&str, &str)]) -> Value {
        let mut m = json!({ "name": name, "uid": format!("uid-{}-{}", namespace.unwrap_or("_"), name), "labels": labels_of(labels) });
        if let Some(ns) = namespace {
            m["namespace"] = Value::String(ns.to_string());
        }
        m
    }

    pub fn namespace(name: &str, enabled: bool) -> RawObject {
        let lbls: &[(&str, &str)] = if enabled { &[(labels::ENABLED, "true")] } else { &[] };
        RawObject::stamped(json!({ "metadata": meta(None, name, lbls), "status": {"phase": "Active"} }), ResourceKindTag::Namespace)
    }

    pub fn component(namespace: &str, name: &str) -> RawObject {
        RawObject::stamped(
            json!({ "metadata": meta(Some(namespace), name, &[]), "spec": {"image": format!("{}:latest", name), "replicas": 1} }),
            ResourceKindTag::Component,
        )
    }

    pub fn pod(namespace: &str, name: &str, owner: Option<&str>) -> RawObject {
        let lbls: Vec<(&str, &str)> = owner.map(|o| vec![(labels::COMPONENT, o)]).unwrap_or_default();
        RawObject::stamped(
            json!({ "metadata": meta(Some(namespace), name, &lbls), "spec": {"containers": [{"name": "main", "image": "nginx"}]}, "status": {"phase": "Running"} }),
            ResourceKindTag::Pod,
        )
    }

    pub fn service(namespace: &str, name: &str, owner: Option<&str>) -> RawObject {
        let lbls: Vec<(&str, &str)> = owner.map(|o| vec![(labels::COMPONENT, o)]).unwrap_or_default();
        RawObject::stamped(
            json!({ "metadata": meta(Some(namespace), name, &lbls), "spec": {"clusterIP": "10.0.0.1", "ports": [{"name": "http", "port": 80, "targetPort": 8080}]} }),
            ResourceKindTag::Service,
        )
    }

    pub fn pvc(namespace: &str, name: &str, volume: &str, managed: bool) -> RawObject {
        let lbls: &[(&str, &str)] = if managed { &[(labels::MANAGED, "true")] } else { &[] };
        RawObject::stamped(
            json!({
                "metadata": meta(Some(namespace), name, lbls),
                "spec": {"volumeName": volume, "storageClassName": "standard", "accessModes": ["ReadWriteOnce"]},
                "status": {"phase": "Bound", "capacity": {"storage": "1Gi"}}
            }),
            ResourceKindTag::PersistentVolumeClaim,
        )
    }

    pub fn persistent_volume(name: &str, reclaim_policy: &str) -> RawObject {
        RawObject::with_type_meta(
            json!({ "metadata": meta(None, name, &[]), "spec": {"persistentVolumeReclaimPolicy": reclaim_policy, "capacity": {"storage": "1Gi"}} }),
            "v1",
            "PersistentVolume",
        )
    }

    pub fn node(name: &str) -> RawObject {
        RawObject::stamped(
            json!({
                "metadata": meta(None, name, &[("node-role.kubernetes.io/worker", "")]),
                "status": {"conditions": [{"type": "Ready", "status": "True"}]}
            }),
            ResourceKindTag::Node,
        )
    }

    pub fn registry(name: &str) -> RawObject {
        RawObject::stamped(json!({ "metadata": meta(None, name, &[]), "spec": {"host": "registry.example.com"} }), ResourceKindTag::DockerRegistry)
    }

    pub fn sso(namespace: &str, name: &str) -> RawObject {
        RawObject::stamped(
            json!({
                "metadata": meta(Some(namespace), name, &[]),
                "spec": {"domain": "sso.example.com", "connectors": [{"type": "github", "config": {"clientId": "id", "clientSecret": "secret"}}]}
            }),
            ResourceKindTag::SingleSignOnConfig,
        )
    }

    /// Any Kalm custom resource with a small spec.
    pub fn custom(kind: ResourceKindTag, namespace: Option<&str>, name: &str) -> RawObject {
        RawObject::stamped(json!({ "metadata": meta(namespace, name, &[]), "spec": {"note": name} }), kind)
    }

    /// An object no handler accepts.
    pub fn malformed() -> RawObject {
        RawObject::new(json!({ "apiVersion": "v1", "kind": "Bogus", "metadata": {"name": "junk"} }))
    }
}
