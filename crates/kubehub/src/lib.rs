//! Pulse kubehub: kube-rs backed change source and resource store.

#![forbid(unsafe_code)]

mod informer;
mod source;
mod store;

use std::fmt::Display;

use anyhow::{Context, Result};
use kube::core::{ApiResource, GroupVersionKind};
use kube::Client;
use pulse_core::{ResourceKindTag, WatchError};

pub use informer::InformerState;
pub use source::KubeSource;
pub use store::KubeStore;

/// Client from the ambient kubeconfig / in-cluster environment.
pub async fn default_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from default config")
}

/// Resolve an `apiVersion` + `kind` pair into a dynamic API resource.
/// Known kinds use their registered plural; anything else falls back to kube's pluralizer.
pub(crate) fn api_resource_for(api_version: &str, kind: &str) -> ApiResource {
    if let Some(tag) = ResourceKindTag::ALL
        .iter()
        .find(|t| t.kube_kind() == kind && t.api_version() == api_version)
    {
        return tag.api_resource();
    }
    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g, v),
        None => ("", api_version),
    };
    ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind))
}

pub(crate) fn map_kube_err(target: impl Display, err: kube::Error) -> WatchError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => WatchError::NotFound(target.to_string()),
        other => WatchError::Lookup(format!("{}: {}", target, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_resource_for_known_and_builtin_kinds() {
        let ar = api_resource_for("core.kalm.dev/v1alpha1", "DockerRegistry");
        assert_eq!(ar.plural, "dockerregistries");
        let ar = api_resource_for("v1", "PersistentVolume");
        assert_eq!(ar.group, "");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.plural, "persistentvolumes");
    }
}
