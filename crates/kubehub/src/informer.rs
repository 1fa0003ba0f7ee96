//! Informer-style classification of raw watcher events into add/update/delete.
//!
//! `kube::runtime::watcher` reports upserts as `Applied` and a relist as
//! `Restarted`. Clients expect informer semantics, so we track what has been
//! seen per kind and derive the action from that.

use kube::core::DynamicObject;
use kube::runtime::watcher::Event;
use pulse_core::source::SourceEvent;
use pulse_core::{Action, RawObject, ResourceKindTag};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

#[derive(Debug, Default)]
pub struct InformerState {
    known: FxHashMap<String, RawObject>,
}

fn object_key(obj: &RawObject) -> String {
    match obj.uid() {
        Some(uid) => uid.to_string(),
        None => obj.display_key(),
    }
}

impl InformerState {
    pub fn len(&self) -> usize { self.known.len() }
    pub fn is_empty(&self) -> bool { self.known.is_empty() }

    pub fn applied(&mut self, obj: RawObject) -> SourceEvent {
        let action = match self.known.insert(object_key(&obj), obj.clone()) {
            Some(_) => Action::Update,
            None => Action::Add,
        };
        SourceEvent::new(action, obj)
    }

    pub fn deleted(&mut self, obj: RawObject) -> SourceEvent {
        self.known.remove(&object_key(&obj));
        SourceEvent::new(Action::Delete, obj)
    }

    /// Relist: objects that disappeared during the gap are reported deleted
    /// (with their last known state), then every listed object is re-delivered.
    pub fn restarted(&mut self, objs: Vec<RawObject>) -> Vec<SourceEvent> {
        let listed: FxHashSet<String> = objs.iter().map(object_key).collect();
        let mut vanished: Vec<String> = self.known.keys().filter(|k| !listed.contains(*k)).cloned().collect();
        vanished.sort_unstable();
        let mut out = Vec::with_capacity(vanished.len() + objs.len());
        for key in vanished {
            if let Some(last) = self.known.remove(&key) {
                out.push(SourceEvent::new(Action::Delete, last));
            }
        }
        for obj in objs {
            out.push(self.applied(obj));
        }
        out
    }

    /// Translate one watcher event for `kind` into zero or more source events.
    pub fn on_event(&mut self, kind: ResourceKindTag, ev: Event<DynamicObject>) -> Vec<SourceEvent> {
        match ev {
            Event::Applied(o) => to_raw(kind, &o).map(|r| vec![self.applied(r)]).unwrap_or_default(),
            Event::Deleted(o) => to_raw(kind, &o).map(|r| vec![self.deleted(r)]).unwrap_or_default(),
            Event::Restarted(list) => {
                let objs = list.iter().filter_map(|o| to_raw(kind, o)).collect();
                self.restarted(objs)
            }
        }
    }
}

fn to_raw(kind: ResourceKindTag, obj: &DynamicObject) -> Option<RawObject> {
    match serde_json::to_value(obj) {
        Ok(v) => Some(RawObject::stamped(v, kind)),
        Err(e) => {
            warn!(kind = %kind, error = %e, "serializing watched object failed; skipping");
            None
        }
    }
}
