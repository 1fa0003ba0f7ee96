use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service};
use kube::{
    api::{Api, ListParams},
    core::DynamicObject,
    Client,
};
use pulse_core::store::ResourceStore;
use pulse_core::{labels, views, ObjectRef, RawObject, ResourceKindTag, WatchError, WatchResult};
use std::time::Instant;
use tracing::debug;

use crate::{api_resource_for, map_kube_err};

/// Read-only store over the live API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    system_namespace: String,
    component_label: String,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            system_namespace: labels::SYSTEM_NAMESPACE.to_string(),
            component_label: labels::COMPONENT.to_string(),
        }
    }

    /// Label selecting a component's pods and services (`<label>=<component>`).
    pub fn with_component_label(mut self, label: impl Into<String>) -> Self {
        self.component_label = label.into();
        self
    }

    pub fn with_system_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.system_namespace = namespace.into();
        self
    }

    fn components(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &ResourceKindTag::Component.api_resource())
    }
}

fn component_selector(label: &str, name: &str) -> ListParams {
    ListParams::default().labels(&format!("{}={}", label, name))
}

#[async_trait::async_trait]
impl ResourceStore for KubeStore {
    async fn get(&self, target: &ObjectRef) -> WatchResult<RawObject> {
        let t0 = Instant::now();
        let ar = api_resource_for(&target.api_version, &target.kind);
        let api: Api<DynamicObject> = match target.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };
        let obj = api.get(&target.name).await.map_err(|e| map_kube_err(target, e))?;
        let raw = serde_json::to_value(&obj).map_err(|e| WatchError::Encode(e.to_string()))?;
        debug!(target = %target, took_ms = %t0.elapsed().as_millis(), "store: get ok");
        Ok(RawObject::with_type_meta(raw, &target.api_version, &target.kind))
    }

    async fn application_details(&self, namespace: &Namespace) -> WatchResult<serde_json::Value> {
        let name = namespace.metadata.name.as_deref().unwrap_or_default();
        let components = self
            .components(name)
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_err(format!("components in {}", name), e))?;
        views::application(namespace, &components.items)
    }

    async fn component_details(&self, component: &DynamicObject) -> WatchResult<serde_json::Value> {
        let ns = component.metadata.namespace.as_deref().unwrap_or_default();
        let name = component.metadata.name.as_deref().unwrap_or_default();
        let lp = component_selector(&self.component_label, name);
        let pods = Api::<Pod>::namespaced(self.client.clone(), ns)
            .list(&lp)
            .await
            .map_err(|e| map_kube_err(format!("pods of component {}/{}", ns, name), e))?;
        let services = Api::<Service>::namespaced(self.client.clone(), ns)
            .list(&lp)
            .await
            .map_err(|e| map_kube_err(format!("services of component {}/{}", ns, name), e))?;
        views::component_details(component, &pods.items, &services.items)
    }

    async fn registry_details(&self, registry: &DynamicObject) -> WatchResult<serde_json::Value> {
        let name = registry.metadata.name.as_deref().unwrap_or_default();
        let secret_name = labels::registry_secret_name(name);
        let secret = Api::<Secret>::namespaced(self.client.clone(), &self.system_namespace)
            .get_opt(&secret_name)
            .await
            .map_err(|e| map_kube_err(ObjectRef::secret(&self.system_namespace, &secret_name), e))?;
        let username = secret
            .and_then(|s| s.data)
            .and_then(|d| d.get("username").map(|b| String::from_utf8_lossy(&b.0).into_owned()));
        Ok(views::registry(registry, username.as_deref()))
    }

    async fn sso_details(&self, config: &DynamicObject) -> WatchResult<serde_json::Value> {
        let name = config.metadata.name.as_deref().unwrap_or(labels::SSO_NAME);
        let ns = config.metadata.namespace.as_deref().unwrap_or(self.system_namespace.as_str());
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), ns, &ResourceKindTag::SingleSignOnConfig.api_resource());
        let current = api
            .get(name)
            .await
            .map_err(|e| map_kube_err(ObjectRef::of(ResourceKindTag::SingleSignOnConfig, Some(ns), name), e))?;
        Ok(views::sso_config(&current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_selector_uses_given_label() {
        let lp = component_selector("app.example/owner", "web");
        assert_eq!(lp.label_selector.as_deref(), Some("app.example/owner=web"));
    }
}
