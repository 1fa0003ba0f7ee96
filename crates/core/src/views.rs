//! Pure builders for the external representation of watched objects.
//!
//! Everything here is side-effect free; lookups happen in the store and their
//! results are passed in.

use std::collections::BTreeMap;

use chrono::SecondsFormat;
use k8s_openapi::api::core::v1::{Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod, Service};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::DynamicObject;
use serde::Serialize;
use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::{WatchError, WatchResult};

/// Serialize a view into a message payload.
pub fn to_data<T: Serialize>(view: &T) -> WatchResult<Value> {
    serde_json::to_value(view).map_err(|e| WatchError::Encode(e.to_string()))
}

fn created_at(meta: &ObjectMeta) -> Option<String> {
    meta.creation_timestamp.as_ref().map(|t| t.0.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn quantities(map: Option<&BTreeMap<String, Quantity>>) -> BTreeMap<String, String> {
    map.map(|m| m.iter().map(|(k, v)| (k.clone(), v.0.clone())).collect()).unwrap_or_default()
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePortView {
    pub name: String,
    pub port: i32,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceView {
    pub name: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub cluster_ip: String,
    pub ports: Vec<ServicePortView>,
    pub selector: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

pub fn service(svc: &Service) -> ServiceView {
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    let spec = svc.spec.clone().unwrap_or_default();
    let ports = spec
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| ServicePortView {
            name: p.name.unwrap_or_default(),
            port: p.port,
            protocol: p.protocol.unwrap_or_else(|| "TCP".to_string()),
            target_port: p.target_port.map(|t| match t {
                IntOrString::Int(i) => i.to_string(),
                IntOrString::String(s) => s,
            }),
            node_port: p.node_port,
        })
        .collect();
    ServiceView {
        name: svc.metadata.name.clone().unwrap_or_default(),
        namespace: svc.metadata.namespace.clone().unwrap_or_default(),
        service_type: spec.type_.unwrap_or_else(|| "ClusterIP".to_string()),
        cluster_ip: spec.cluster_ip.unwrap_or_default(),
        ports,
        selector: spec.selector.unwrap_or_default(),
        labels: svc.metadata.labels.clone().unwrap_or_default(),
        created_at: created_at(&svc.metadata),
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodView {
    pub name: String,
    pub node: String,
    pub phase: String,
    /// `ready/total` containers
    pub ready: String,
    pub restarts: i32,
    pub pod_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

pub fn pod(p: &Pod) -> PodView {
    let status = p.status.clone().unwrap_or_default();
    let containers = status.container_statuses.unwrap_or_default();
    let ready = containers.iter().filter(|c| c.ready).count();
    let restarts = containers.iter().map(|c| c.restart_count).sum();
    PodView {
        name: p.metadata.name.clone().unwrap_or_default(),
        node: p.spec.as_ref().and_then(|s| s.node_name.clone()).unwrap_or_default(),
        phase: status.phase.unwrap_or_else(|| "Unknown".to_string()),
        ready: format!("{}/{}", ready, containers.len()),
        restarts,
        pod_ip: status.pod_ip.unwrap_or_default(),
        created_at: created_at(&p.metadata),
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub name: String,
    pub roles: SmallVec<[String; 2]>,
    pub ready: bool,
    pub unschedulable: bool,
    pub internal_ip: String,
    pub kubelet_version: String,
    pub capacity: BTreeMap<String, String>,
    pub allocatable: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

const NODE_ROLE_PREFIX: &str = "node-role.kubernetes.io/";

pub fn node(n: &Node) -> NodeView {
    let labels = n.metadata.labels.clone().unwrap_or_default();
    let roles = labels.keys().filter_map(|k| k.strip_prefix(NODE_ROLE_PREFIX)).map(|r| r.to_string()).collect();
    let status = n.status.clone().unwrap_or_default();
    let ready = status
        .conditions
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|c| c.type_ == "Ready" && c.status == "True");
    let internal_ip = status
        .addresses
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|a| a.type_ == "InternalIP")
        .map(|a| a.address.clone())
        .unwrap_or_default();
    NodeView {
        name: n.metadata.name.clone().unwrap_or_default(),
        roles,
        ready,
        unschedulable: n.spec.as_ref().and_then(|s| s.unschedulable).unwrap_or(false),
        internal_ip,
        kubelet_version: status.node_info.map(|i| i.kubelet_version).unwrap_or_default(),
        capacity: quantities(status.capacity.as_ref()),
        allocatable: quantities(status.allocatable.as_ref()),
        labels,
        created_at: created_at(&n.metadata),
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeView {
    pub name: String,
    pub namespace: String,
    pub component: String,
    pub storage_class_name: String,
    pub capacity: String,
    pub phase: String,
    pub pvc: String,
    /// Empty when the bound volume is unknown (e.g. the claim was deleted).
    pub pv: String,
    pub reclaim_policy: String,
}

/// Claim plus its bound volume. Pass `PersistentVolume::default()` as placeholder
/// when the volume must not (or cannot) be fetched. `component_label` names the
/// back-reference label carrying the owning component.
pub fn volume(claim: &PersistentVolumeClaim, pv: &PersistentVolume, component_label: &str) -> VolumeView {
    let claim_status = claim.status.clone().unwrap_or_default();
    let pv_spec = pv.spec.clone().unwrap_or_default();
    let capacity = claim_status
        .capacity
        .as_ref()
        .and_then(|c| c.get("storage"))
        .or_else(|| pv_spec.capacity.as_ref().and_then(|c| c.get("storage")))
        .map(|q| q.0.clone())
        .unwrap_or_default();
    let name = claim.metadata.name.clone().unwrap_or_default();
    VolumeView {
        name: name.clone(),
        namespace: claim.metadata.namespace.clone().unwrap_or_default(),
        component: claim
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(component_label))
            .cloned()
            .unwrap_or_default(),
        storage_class_name: claim.spec.as_ref().and_then(|s| s.storage_class_name.clone()).unwrap_or_default(),
        capacity,
        phase: claim_status.phase.unwrap_or_default(),
        pvc: name,
        pv: pv.metadata.name.clone().unwrap_or_default(),
        reclaim_policy: pv_spec.persistent_volume_reclaim_policy.unwrap_or_default(),
    }
}

/// Flattened view of a Kalm custom resource: name/namespace, the spec fields
/// hoisted to the top level, and the status under `status`.
pub fn custom_resource(obj: &DynamicObject) -> Value {
    let mut out = Map::new();
    out.insert("name".into(), Value::String(obj.metadata.name.clone().unwrap_or_default()));
    if let Some(ns) = &obj.metadata.namespace {
        out.insert("namespace".into(), Value::String(ns.clone()));
    }
    if let Some(ts) = created_at(&obj.metadata) {
        out.insert("createdAt".into(), Value::String(ts));
    }
    if let Some(spec) = obj.data.get("spec").and_then(|s| s.as_object()) {
        for (k, v) in spec {
            out.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    if let Some(status) = obj.data.get("status") {
        out.insert("status".into(), status.clone());
    }
    Value::Object(out)
}

pub fn http_route(route: &DynamicObject) -> Value { custom_resource(route) }

pub fn protected_endpoint(endpoint: &DynamicObject) -> Value { custom_resource(endpoint) }

pub fn deploy_key(key: &DynamicObject) -> Value { custom_resource(key) }

/// Certificate view with a top-level `ready` flag from its `Ready` condition.
pub fn https_cert(cert: &DynamicObject) -> Value {
    let ready = cert
        .data
        .pointer("/status/conditions")
        .and_then(|c| c.as_array())
        .map(|conds| {
            conds.iter().any(|c| {
                c.get("type").and_then(|t| t.as_str()) == Some("Ready")
                    && c.get("status").and_then(|s| s.as_str()) == Some("True")
            })
        })
        .unwrap_or(false);
    let mut view = custom_resource(cert);
    if let Some(map) = view.as_object_mut() {
        map.insert("ready".into(), Value::Bool(ready));
    }
    view
}

/// Registry view. The password never leaves the cluster.
pub fn registry(reg: &DynamicObject, username: Option<&str>) -> Value {
    let mut view = custom_resource(reg);
    if let Some(map) = view.as_object_mut() {
        map.insert("username".into(), Value::String(username.unwrap_or_default().to_string()));
        map.insert("password".into(), Value::String(String::new()));
    }
    view
}

/// Single-sign-on view with connector client secrets removed.
pub fn sso_config(config: &DynamicObject) -> Value {
    let mut view = custom_resource(config);
    if let Some(connectors) = view.get_mut("connectors").and_then(|c| c.as_array_mut()) {
        for conn in connectors {
            if let Some(cfg) = conn.get_mut("config").and_then(|c| c.as_object_mut()) {
                cfg.remove("clientSecret");
            }
        }
    }
    view
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceView {
    pub name: String,
    pub phase: String,
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

pub fn namespace(ns: &Namespace) -> NamespaceView {
    NamespaceView {
        name: ns.metadata.name.clone().unwrap_or_default(),
        phase: ns.status.as_ref().and_then(|s| s.phase.clone()).unwrap_or_default(),
        labels: ns.metadata.labels.clone().unwrap_or_default(),
        created_at: created_at(&ns.metadata),
    }
}

/// Application = managed namespace plus the components deployed in it.
pub fn application(ns: &Namespace, components: &[DynamicObject]) -> WatchResult<Value> {
    let mut view = to_data(&namespace(ns))?;
    if let Some(map) = view.as_object_mut() {
        map.insert("components".into(), Value::Array(components.iter().map(custom_resource).collect()));
    }
    Ok(view)
}

/// Component plus the pods and services that carry its back-reference label.
pub fn component_details(component: &DynamicObject, pods: &[Pod], services: &[Service]) -> WatchResult<Value> {
    let mut view = custom_resource(component);
    let pods = pods.iter().map(|p| to_data(&pod(p))).collect::<WatchResult<Vec<_>>>()?;
    let services = services.iter().map(|s| to_data(&service(s))).collect::<WatchResult<Vec<_>>>()?;
    if let Some(map) = view.as_object_mut() {
        map.insert("pods".into(), Value::Array(pods));
        map.insert("services".into(), Value::Array(services));
    }
    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels;
    use serde_json::json;

    fn dyn_obj(v: Value) -> DynamicObject { serde_json::from_value(v).unwrap() }

    #[test]
    fn custom_resource_hoists_spec_and_keeps_identity() {
        let obj = dyn_obj(json!({
            "apiVersion": "core.kalm.dev/v1alpha1",
            "kind": "HttpRoute",
            "metadata": {"name": "r1", "namespace": "ns1"},
            "spec": {"hosts": ["a.example"], "name": "shadowed"},
            "status": {"hostCertifications": {}}
        }));
        let v = http_route(&obj);
        assert_eq!(v["name"], "r1");
        assert_eq!(v["namespace"], "ns1");
        assert_eq!(v["hosts"], json!(["a.example"]));
        assert!(v["status"].is_object());
    }

    #[test]
    fn volume_with_placeholder_has_empty_pv() {
        let claim: PersistentVolumeClaim = serde_json::from_value(json!({
            "metadata": {"name": "data", "namespace": "ns1", "labels": {"kalm-managed": "true", "kalm-component": "db"}},
            "spec": {"storageClassName": "standard", "volumeName": "pv-1"},
            "status": {"phase": "Bound", "capacity": {"storage": "1Gi"}}
        }))
        .unwrap();
        let v = volume(&claim, &PersistentVolume::default(), labels::COMPONENT);
        assert_eq!(v.pv, "");
        assert_eq!(v.pvc, "data");
        assert_eq!(v.component, "db");
        assert_eq!(v.capacity, "1Gi");
    }

    #[test]
    fn volume_component_follows_configured_label() {
        let claim: PersistentVolumeClaim = serde_json::from_value(json!({
            "metadata": {"name": "data", "namespace": "ns1", "labels": {"kalm-component": "db", "app.example/owner": "api"}}
        }))
        .unwrap();
        assert_eq!(volume(&claim, &PersistentVolume::default(), "app.example/owner").component, "api");
        assert_eq!(volume(&claim, &PersistentVolume::default(), "missing").component, "");
    }

    #[test]
    fn node_view_derives_roles_and_readiness() {
        let n: Node = serde_json::from_value(json!({
            "metadata": {"name": "n1", "labels": {"node-role.kubernetes.io/master": ""}},
            "status": {
                "conditions": [{"type": "Ready", "status": "True"}],
                "addresses": [{"type": "InternalIP", "address": "10.0.0.1"}],
                "capacity": {"cpu": "4"}
            }
        }))
        .unwrap();
        let v = node(&n);
        assert!(v.ready);
        assert_eq!(v.roles.as_slice(), ["master".to_string()]);
        assert_eq!(v.internal_ip, "10.0.0.1");
        assert_eq!(v.capacity.get("cpu").map(String::as_str), Some("4"));
    }

    #[test]
    fn sso_view_redacts_client_secrets() {
        let obj = dyn_obj(json!({
            "metadata": {"name": "sso", "namespace": "kalm-system"},
            "spec": {"domain": "sso.example", "connectors": [{"type": "github", "config": {"clientId": "id", "clientSecret": "s3cr3t"}}]}
        }));
        let v = sso_config(&obj);
        assert_eq!(v["connectors"][0]["config"]["clientId"], "id");
        assert!(v["connectors"][0]["config"].get("clientSecret").is_none());
    }

    #[test]
    fn service_view_defaults_type_and_protocol() {
        let svc: Service = serde_json::from_value(json!({
            "metadata": {"name": "web", "namespace": "ns1"},
            "spec": {"ports": [{"port": 80, "targetPort": 8080}]}
        }))
        .unwrap();
        let v = service(&svc);
        assert_eq!(v.service_type, "ClusterIP");
        assert_eq!(v.ports[0].protocol, "TCP");
        assert_eq!(v.ports[0].target_port.as_deref(), Some("8080"));
    }
}
