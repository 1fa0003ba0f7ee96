//! Kind handler table: one translation capability per watched kind.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod, Service};
use kube::core::DynamicObject;
use pulse_core::store::ResourceStore;
use pulse_core::{views, Action, Message, ObjectRef, Outcome, RawObject, ResourceKindTag, WatchError, WatchResult};
use rustc_hash::FxHashMap;

use crate::config::Policy;
use crate::resolver;

/// `kind` values of outbound messages.
pub mod message_kind {
    pub const APPLICATION: &str = "Application";
    pub const COMPONENT: &str = "Component";
    pub const SERVICE: &str = "Service";
    pub const HTTP_ROUTE: &str = "HttpRoute";
    pub const NODE: &str = "Node";
    pub const HTTPS_CERT: &str = "HttpsCert";
    pub const REGISTRY: &str = "Registry";
    pub const VOLUME: &str = "Volume";
    pub const SSO_CONFIG: &str = "SingleSignOnConfig";
    pub const PROTECTED_ENDPOINT: &str = "ProtectedEndpoint";
    pub const DEPLOY_KEY: &str = "DeployKey";
}

/// What a handler may touch while translating: the read-only store and the label policy.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn ResourceStore>,
    pub policy: Arc<Policy>,
}

impl Context {
    pub fn new(store: Arc<dyn ResourceStore>, policy: Policy) -> Self {
        Self { store, policy: Arc::new(policy) }
    }
}

/// Translation of one raw change into an outbound outcome.
#[async_trait::async_trait]
pub trait Translate: Send + Sync {
    fn kind(&self) -> ResourceKindTag;

    async fn translate(&self, ctx: &Context, action: Action, obj: &RawObject) -> WatchResult<Outcome>;
}

fn emit(kind: &str, action: Action, namespace: Option<&str>, data: serde_json::Value) -> Outcome {
    Outcome::Emit(Message::new(kind, action, data).in_namespace(namespace.unwrap_or_default()))
}

fn label<'a>(meta: &'a k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta, key: &str) -> Option<&'a str> {
    meta.labels.as_ref().and_then(|l| l.get(key)).map(|s| s.as_str())
}

// ---------------- Per-kind handlers ----------------

/// Managed namespaces surface as applications; the system namespace and
/// namespaces without the enable label are suppressed.
pub struct NamespaceHandler;

#[async_trait::async_trait]
impl Translate for NamespaceHandler {
    fn kind(&self) -> ResourceKindTag { ResourceKindTag::Namespace }

    async fn translate(&self, ctx: &Context, action: Action, obj: &RawObject) -> WatchResult<Outcome> {
        let ns: Namespace = obj.decode(self.kind())?;
        if ns.metadata.name.as_deref() == Some(ctx.policy.system_namespace.as_str()) {
            return Ok(Outcome::Suppressed);
        }
        if label(&ns.metadata, &ctx.policy.enabled_label).is_none() {
            return Ok(Outcome::Suppressed);
        }
        let details = ctx.store.application_details(&ns).await?;
        Ok(emit(message_kind::APPLICATION, action, None, details))
    }
}

pub struct ComponentHandler;

#[async_trait::async_trait]
impl Translate for ComponentHandler {
    fn kind(&self) -> ResourceKindTag { ResourceKindTag::Component }

    async fn translate(&self, ctx: &Context, action: Action, obj: &RawObject) -> WatchResult<Outcome> {
        let component: DynamicObject = obj.decode(self.kind())?;
        resolver::component_message(ctx, &component, action).await
    }
}

/// Services owned by a component are reported as an update of that component;
/// free-standing services are reported as themselves.
pub struct ServiceHandler;

#[async_trait::async_trait]
impl Translate for ServiceHandler {
    fn kind(&self) -> ResourceKindTag { ResourceKindTag::Service }

    async fn translate(&self, ctx: &Context, action: Action, obj: &RawObject) -> WatchResult<Outcome> {
        let svc: Service = obj.decode(self.kind())?;
        let owner = label(&svc.metadata, &ctx.policy.component_label);
        if owner.map_or(false, |o| !o.is_empty()) {
            return resolver::resolve_owner(ctx, svc.metadata.namespace.as_deref(), owner).await;
        }
        let data = views::to_data(&views::service(&svc))?;
        Ok(emit(message_kind::SERVICE, action, svc.metadata.namespace.as_deref(), data))
    }
}

/// Pods only matter through their owning component.
pub struct PodHandler;

#[async_trait::async_trait]
impl Translate for PodHandler {
    fn kind(&self) -> ResourceKindTag { ResourceKindTag::Pod }

    async fn translate(&self, ctx: &Context, _action: Action, obj: &RawObject) -> WatchResult<Outcome> {
        let pod: Pod = obj.decode(self.kind())?;
        let owner = label(&pod.metadata, &ctx.policy.component_label);
        resolver::resolve_owner(ctx, pod.metadata.namespace.as_deref(), owner).await
    }
}

pub struct HttpRouteHandler;

#[async_trait::async_trait]
impl Translate for HttpRouteHandler {
    fn kind(&self) -> ResourceKindTag { ResourceKindTag::HttpRoute }

    async fn translate(&self, _ctx: &Context, action: Action, obj: &RawObject) -> WatchResult<Outcome> {
        let route: DynamicObject = obj.decode(self.kind())?;
        Ok(emit(message_kind::HTTP_ROUTE, action, route.metadata.namespace.as_deref(), views::http_route(&route)))
    }
}

pub struct NodeHandler;

#[async_trait::async_trait]
impl Translate for NodeHandler {
    fn kind(&self) -> ResourceKindTag { ResourceKindTag::Node }

    async fn translate(&self, _ctx: &Context, action: Action, obj: &RawObject) -> WatchResult<Outcome> {
        let node: Node = obj.decode(self.kind())?;
        Ok(emit(message_kind::NODE, action, None, views::to_data(&views::node(&node))?))
    }
}

pub struct HttpsCertHandler;

#[async_trait::async_trait]
impl Translate for HttpsCertHandler {
    fn kind(&self) -> ResourceKindTag { ResourceKindTag::HttpsCert }

    async fn translate(&self, _ctx: &Context, action: Action, obj: &RawObject) -> WatchResult<Outcome> {
        let cert: DynamicObject = obj.decode(self.kind())?;
        Ok(emit(message_kind::HTTPS_CERT, action, None, views::https_cert(&cert)))
    }
}

/// Registries merge their credentials secret, except on delete where the
/// secret is going away with them.
pub struct RegistryHandler;

#[async_trait::async_trait]
impl Translate for RegistryHandler {
    fn kind(&self) -> ResourceKindTag { ResourceKindTag::DockerRegistry }

    async fn translate(&self, ctx: &Context, action: Action, obj: &RawObject) -> WatchResult<Outcome> {
        let registry: DynamicObject = obj.decode(self.kind())?;
        let data = match action {
            Action::Delete => views::registry(&registry, None),
            _ => ctx.store.registry_details(&registry).await?,
        };
        Ok(emit(message_kind::REGISTRY, action, None, data))
    }
}

/// Storage claims provisioned by Kalm, reported together with their bound volume.
pub struct VolumeHandler;

#[async_trait::async_trait]
impl Translate for VolumeHandler {
    fn kind(&self) -> ResourceKindTag { ResourceKindTag::PersistentVolumeClaim }

    async fn translate(&self, ctx: &Context, action: Action, obj: &RawObject) -> WatchResult<Outcome> {
        let claim: PersistentVolumeClaim = obj.decode(self.kind())?;
        if label(&claim.metadata, &ctx.policy.managed_label) != Some("true") {
            return Ok(Outcome::Suppressed);
        }
        let volume_name = claim.spec.as_ref().and_then(|s| s.volume_name.as_deref()).filter(|n| !n.is_empty());
        // The bound volume may already be gone on delete; an unbound claim has none yet.
        let pv = match (action, volume_name) {
            (Action::Delete, _) | (_, None) => PersistentVolume::default(),
            (_, Some(name)) => {
                let raw = ctx.store.get(&ObjectRef::persistent_volume(name)).await?;
                raw.decode_named::<PersistentVolume>("PersistentVolume")
                    .map_err(|e| WatchError::Lookup(format!("PersistentVolume {}: {}", name, e)))?
            }
        };
        let data = views::to_data(&views::volume(&claim, &pv, &ctx.policy.component_label))?;
        Ok(emit(message_kind::VOLUME, action, claim.metadata.namespace.as_deref(), data))
    }
}

/// Only the reserved singleton config is reported; every other name is
/// ignored outright (not even counted as suppressed).
pub struct SsoConfigHandler;

#[async_trait::async_trait]
impl Translate for SsoConfigHandler {
    fn kind(&self) -> ResourceKindTag { ResourceKindTag::SingleSignOnConfig }

    async fn translate(&self, ctx: &Context, action: Action, obj: &RawObject) -> WatchResult<Outcome> {
        let config: DynamicObject = obj.decode(self.kind())?;
        if config.metadata.name.as_deref() != Some(ctx.policy.sso_name.as_str()) {
            return Ok(Outcome::Ignored);
        }
        let data = match action {
            Action::Delete => views::sso_config(&config),
            _ => ctx.store.sso_details(&config).await?,
        };
        Ok(emit(message_kind::SSO_CONFIG, action, config.metadata.namespace.as_deref(), data))
    }
}

pub struct ProtectedEndpointHandler;

#[async_trait::async_trait]
impl Translate for ProtectedEndpointHandler {
    fn kind(&self) -> ResourceKindTag { ResourceKindTag::ProtectedEndpoint }

    async fn translate(&self, _ctx: &Context, action: Action, obj: &RawObject) -> WatchResult<Outcome> {
        let endpoint: DynamicObject = obj.decode(self.kind())?;
        Ok(emit(
            message_kind::PROTECTED_ENDPOINT,
            action,
            endpoint.metadata.namespace.as_deref(),
            views::protected_endpoint(&endpoint),
        ))
    }
}

pub struct DeployKeyHandler;

#[async_trait::async_trait]
impl Translate for DeployKeyHandler {
    fn kind(&self) -> ResourceKindTag { ResourceKindTag::DeployKey }

    async fn translate(&self, _ctx: &Context, action: Action, obj: &RawObject) -> WatchResult<Outcome> {
        let key: DynamicObject = obj.decode(self.kind())?;
        Ok(emit(message_kind::DEPLOY_KEY, action, key.metadata.namespace.as_deref(), views::deploy_key(&key)))
    }
}

// ---------------- Table ----------------

/// Mapping from kind to its handler. The key set decides which kinds get wired.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: FxHashMap<ResourceKindTag, Arc<dyn Translate>>,
}

impl HandlerTable {
    pub fn new() -> Self { Self::default() }

    /// Every kind with its stock handler.
    pub fn standard() -> Self {
        let all: [Arc<dyn Translate>; 12] = [
            Arc::new(NamespaceHandler),
            Arc::new(ComponentHandler),
            Arc::new(ServiceHandler),
            Arc::new(PodHandler),
            Arc::new(HttpRouteHandler),
            Arc::new(NodeHandler),
            Arc::new(HttpsCertHandler),
            Arc::new(RegistryHandler),
            Arc::new(VolumeHandler),
            Arc::new(SsoConfigHandler),
            Arc::new(ProtectedEndpointHandler),
            Arc::new(DeployKeyHandler),
        ];
        all.into_iter().fold(Self::new(), |t, h| t.with(h))
    }

    /// Register (or replace) the handler for its kind.
    pub fn with(mut self, handler: Arc<dyn Translate>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    /// Keep only the listed kinds.
    pub fn retain_kinds(mut self, kinds: &[ResourceKindTag]) -> Self {
        self.handlers.retain(|k, _| kinds.contains(k));
        self
    }

    pub fn get(&self, kind: ResourceKindTag) -> Option<&Arc<dyn Translate>> { self.handlers.get(&kind) }

    /// Registered kinds in a stable order.
    pub fn kinds(&self) -> Vec<ResourceKindTag> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize { self.handlers.len() }
    pub fn is_empty(&self) -> bool { self.handlers.is_empty() }

    pub async fn translate(
        &self,
        ctx: &Context,
        kind: ResourceKindTag,
        action: Action,
        obj: &RawObject,
    ) -> WatchResult<Outcome> {
        let handler = self.get(kind).ok_or(WatchError::UnknownKind(kind))?;
        handler.translate(ctx, action, obj).await
    }
}
