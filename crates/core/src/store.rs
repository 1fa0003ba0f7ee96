//! Lookup collaborator: read-only access to current cluster state and the
//! builders for the rich views clients receive.

use k8s_openapi::api::core::v1::Namespace;
use kube::core::DynamicObject;

use crate::{ObjectRef, RawObject, WatchResult};

#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch one object by kind, namespace and name.
    async fn get(&self, target: &ObjectRef) -> WatchResult<RawObject>;

    /// Application view of a managed namespace (namespace plus its components).
    async fn application_details(&self, namespace: &Namespace) -> WatchResult<serde_json::Value>;

    /// Full component view including its pods and services.
    async fn component_details(&self, component: &DynamicObject) -> WatchResult<serde_json::Value>;

    /// Registry view including the username from its credentials secret.
    async fn registry_details(&self, registry: &DynamicObject) -> WatchResult<serde_json::Value>;

    /// Current view of the single-sign-on singleton.
    async fn sso_details(&self, config: &DynamicObject) -> WatchResult<serde_json::Value>;
}
