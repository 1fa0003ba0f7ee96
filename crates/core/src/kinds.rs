//! The closed set of resource kinds the engine watches.

use std::fmt;
use std::str::FromStr;

use kube::core::{ApiResource, GroupVersionKind};
use serde::{Deserialize, Serialize};

/// API group of the Kalm custom resources.
pub const KALM_GROUP: &str = "core.kalm.dev";
/// Served version of the Kalm custom resources.
pub const KALM_VERSION: &str = "v1alpha1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKindTag {
    Namespace,
    Component,
    Service,
    Pod,
    HttpRoute,
    Node,
    HttpsCert,
    DockerRegistry,
    PersistentVolumeClaim,
    SingleSignOnConfig,
    ProtectedEndpoint,
    DeployKey,
}

impl ResourceKindTag {
    pub const ALL: [ResourceKindTag; 12] = [
        ResourceKindTag::Namespace,
        ResourceKindTag::Component,
        ResourceKindTag::Service,
        ResourceKindTag::Pod,
        ResourceKindTag::HttpRoute,
        ResourceKindTag::Node,
        ResourceKindTag::HttpsCert,
        ResourceKindTag::DockerRegistry,
        ResourceKindTag::PersistentVolumeClaim,
        ResourceKindTag::SingleSignOnConfig,
        ResourceKindTag::ProtectedEndpoint,
        ResourceKindTag::DeployKey,
    ];

    /// Kubernetes `kind` of the watched objects.
    pub fn kube_kind(&self) -> &'static str {
        match self {
            ResourceKindTag::Namespace => "Namespace",
            ResourceKindTag::Component => "Component",
            ResourceKindTag::Service => "Service",
            ResourceKindTag::Pod => "Pod",
            ResourceKindTag::HttpRoute => "HttpRoute",
            ResourceKindTag::Node => "Node",
            ResourceKindTag::HttpsCert => "HttpsCert",
            ResourceKindTag::DockerRegistry => "DockerRegistry",
            ResourceKindTag::PersistentVolumeClaim => "PersistentVolumeClaim",
            ResourceKindTag::SingleSignOnConfig => "SingleSignOnConfig",
            ResourceKindTag::ProtectedEndpoint => "ProtectedEndpoint",
            ResourceKindTag::DeployKey => "DeployKey",
        }
    }

    /// Whether the kind is a Kalm CRD (as opposed to a core/v1 built-in).
    pub fn is_custom(&self) -> bool {
        !matches!(
            self,
            ResourceKindTag::Namespace
                | ResourceKindTag::Service
                | ResourceKindTag::Pod
                | ResourceKindTag::Node
                | ResourceKindTag::PersistentVolumeClaim
        )
    }

    pub fn group(&self) -> &'static str {
        if self.is_custom() { KALM_GROUP } else { "" }
    }

    pub fn version(&self) -> &'static str {
        if self.is_custom() { KALM_VERSION } else { "v1" }
    }

    /// `apiVersion` as it appears on the wire, e.g. `v1` or `core.kalm.dev/v1alpha1`.
    pub fn api_version(&self) -> String {
        if self.is_custom() {
            format!("{}/{}", KALM_GROUP, KALM_VERSION)
        } else {
            "v1".to_string()
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKindTag::Namespace => "namespaces",
            ResourceKindTag::Component => "components",
            ResourceKindTag::Service => "services",
            ResourceKindTag::Pod => "pods",
            ResourceKindTag::HttpRoute => "httproutes",
            ResourceKindTag::Node => "nodes",
            ResourceKindTag::HttpsCert => "httpscerts",
            ResourceKindTag::DockerRegistry => "dockerregistries",
            ResourceKindTag::PersistentVolumeClaim => "persistentvolumeclaims",
            ResourceKindTag::SingleSignOnConfig => "singlesignonconfigs",
            ResourceKindTag::ProtectedEndpoint => "protectedendpoints",
            ResourceKindTag::DeployKey => "deploykeys",
        }
    }

    pub fn namespaced(&self) -> bool {
        !matches!(
            self,
            ResourceKindTag::Namespace
                | ResourceKindTag::Node
                | ResourceKindTag::HttpsCert
                | ResourceKindTag::DockerRegistry
        )
    }

    /// Dynamic API resource used to build `Api<DynamicObject>` handles.
    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(self.group(), self.version(), self.kube_kind());
        ApiResource::from_gvk_with_plural(&gvk, self.plural())
    }
}

impl fmt::Display for ResourceKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kube_kind())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKindName(pub String);

impl fmt::Display for UnknownKindName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown resource kind: {}", self.0)
    }
}

impl std::error::Error for UnknownKindName {}

impl FromStr for ResourceKindTag {
    type Err = UnknownKindName;

    /// Accepts the kind name (`HttpRoute`) or its plural (`httproutes`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        ResourceKindTag::ALL
            .iter()
            .copied()
            .find(|k| k.kube_kind().eq_ignore_ascii_case(needle) || k.plural().eq_ignore_ascii_case(needle))
            .ok_or_else(|| UnknownKindName(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kind_and_plural_names() {
        assert_eq!("HttpRoute".parse::<ResourceKindTag>().unwrap(), ResourceKindTag::HttpRoute);
        assert_eq!("pods".parse::<ResourceKindTag>().unwrap(), ResourceKindTag::Pod);
        assert_eq!(" persistentvolumeclaim ".parse::<ResourceKindTag>().unwrap(), ResourceKindTag::PersistentVolumeClaim);
        assert!("Deployment".parse::<ResourceKindTag>().is_err());
    }

    #[test]
    fn display_round_trips_for_every_tag() {
        for k in ResourceKindTag::ALL {
            assert_eq!(k.to_string().parse::<ResourceKindTag>().unwrap(), k);
        }
    }

    #[test]
    fn custom_kinds_live_in_kalm_group() {
        assert_eq!(ResourceKindTag::Component.api_version(), "core.kalm.dev/v1alpha1");
        assert_eq!(ResourceKindTag::Service.api_version(), "v1");
        let ar = ResourceKindTag::DockerRegistry.api_resource();
        assert_eq!(ar.group, KALM_GROUP);
        assert_eq!(ar.plural, "dockerregistries");
        assert!(!ResourceKindTag::DockerRegistry.namespaced());
        assert!(ResourceKindTag::DeployKey.namespaced());
    }
}
