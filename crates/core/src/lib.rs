//! Pulse core types: change events, outbound messages and the contracts of the
//! collaborators the dispatch engine is wired against.

#![forbid(unsafe_code)]

mod error;
mod kinds;
pub mod labels;
pub mod source;
pub mod store;
pub mod views;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use error::{WatchError, WatchResult};
pub use kinds::{ResourceKindTag, UnknownKindName, KALM_GROUP, KALM_VERSION};

pub mod prelude {
    pub use super::source::{CancelHandle, ChangeSource, SourceEvent, Subscription};
    pub use super::store::ResourceStore;
    pub use super::{Action, ChangeEvent, Message, ObjectRef, Outcome, RawObject, ResourceKindTag, WatchError, WatchResult};
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Action {
    Add,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Add => "Add",
            Action::Update => "Update",
            Action::Delete => "Delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Watched object in its JSON form. Handlers decode it into the shape their kind expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct RawObject(serde_json::Value);

impl RawObject {
    pub fn new(mut raw: serde_json::Value) -> Self {
        if cfg!(feature = "strip-managed-fields") {
            strip_managed_fields(&mut raw);
        }
        Self(raw)
    }

    /// Wrap a raw value and stamp `apiVersion`/`kind` from the tag when they are absent.
    /// List responses omit both on their items.
    pub fn stamped(raw: serde_json::Value, tag: ResourceKindTag) -> Self {
        Self::with_type_meta(raw, &tag.api_version(), tag.kube_kind())
    }

    pub fn with_type_meta(raw: serde_json::Value, api_version: &str, kind: &str) -> Self {
        let mut obj = Self::new(raw);
        if let Some(map) = obj.0.as_object_mut() {
            map.entry("apiVersion").or_insert_with(|| serde_json::Value::String(api_version.to_string()));
            map.entry("kind").or_insert_with(|| serde_json::Value::String(kind.to_string()));
        }
        obj
    }

    pub fn as_json(&self) -> &serde_json::Value { &self.0 }
    pub fn into_json(self) -> serde_json::Value { self.0 }

    pub fn kind(&self) -> Option<&str> {
        self.0.get("kind").and_then(|v| v.as_str())
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.0.get("metadata").and_then(|m| m.get(key)).and_then(|v| v.as_str())
    }

    pub fn name(&self) -> Option<&str> { self.meta_str("name") }
    pub fn namespace(&self) -> Option<&str> { self.meta_str("namespace") }
    pub fn uid(&self) -> Option<&str> { self.meta_str("uid") }
    pub fn resource_version(&self) -> Option<&str> { self.meta_str("resourceVersion") }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.0
            .get("metadata")
            .and_then(|m| m.get("labels"))
            .and_then(|l| l.get(key))
            .and_then(|v| v.as_str())
    }

    /// `namespace/name` (or just `name`) for log lines; `-` when unnamed.
    pub fn display_key(&self) -> String {
        match (self.namespace(), self.name()) {
            (Some(ns), Some(name)) => format!("{}/{}", ns, name),
            (None, Some(name)) => name.to_string(),
            _ => "-".to_string(),
        }
    }

    /// Decode into `T`, checking that the object really is a `tag`.
    pub fn decode<T: DeserializeOwned>(&self, tag: ResourceKindTag) -> WatchResult<T> {
        self.decode_named(tag.kube_kind()).map_err(|detail| WatchError::mismatch(tag, detail))
    }

    /// Like [`RawObject::decode`] for kinds outside the watched set (e.g. `PersistentVolume`).
    /// The object must carry its `kind`; use [`RawObject::stamped`] for list items.
    pub fn decode_named<T: DeserializeOwned>(&self, expected_kind: &str) -> Result<T, String> {
        match self.kind() {
            Some(kind) if kind == expected_kind => {}
            Some(kind) => return Err(format!("got kind {}", kind)),
            None => return Err("missing kind".to_string()),
        }
        serde_json::from_value(self.0.clone()).map_err(|e| e.to_string())
    }
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

/// One raw change delivered by a source subscription, tagged with its kind.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ResourceKindTag,
    pub action: Action,
    pub object: RawObject,
}

/// Uniform outbound notification handed to the transport.
///
/// A message with an empty `kind` is the "suppress" sentinel and is never forwarded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub namespace: String,
    pub kind: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Message {
    pub fn new(kind: impl Into<String>, action: Action, data: serde_json::Value) -> Self {
        Self { namespace: String::new(), kind: kind.into(), action: action.to_string(), data: Some(data) }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn empty() -> Self { Self::default() }

    pub fn is_empty(&self) -> bool { self.kind.is_empty() }
}

/// Result of translating one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Emit(Message),
    /// Filtered out by a kind's predicate (the empty-message path).
    Suppressed,
    /// Dropped without any trace, distinct from `Suppressed`.
    Ignored,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Emit(m) if m.is_empty() => "suppressed",
            Outcome::Emit(_) => "emitted",
            Outcome::Suppressed => "suppressed",
            Outcome::Ignored => "ignored",
        }
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            Outcome::Emit(m) if !m.is_empty() => Some(m),
            _ => None,
        }
    }

    pub fn into_message(self) -> Option<Message> {
        match self {
            Outcome::Emit(m) if !m.is_empty() => Some(m),
            _ => None,
        }
    }
}

/// Address of an object for store lookups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn new(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: namespace.map(|s| s.to_string()),
            name: name.to_string(),
        }
    }

    pub fn of(tag: ResourceKindTag, namespace: Option<&str>, name: &str) -> Self {
        let ns = if tag.namespaced() { namespace } else { None };
        Self::new(&tag.api_version(), tag.kube_kind(), ns, name)
    }

    pub fn persistent_volume(name: &str) -> Self {
        Self::new("v1", "PersistentVolume", None, name)
    }

    pub fn secret(namespace: &str, name: &str) -> Self {
        Self::new("v1", "Secret", Some(namespace), name)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}
