//! Owner resolution: dependents (pods, services) are reported through the
//! component they point at.

use kube::core::DynamicObject;
use pulse_core::{Action, Message, ObjectRef, Outcome, ResourceKindTag, WatchResult};
use tracing::debug;

use crate::handlers::{message_kind, Context};

/// Build the `Component` message for an already decoded component.
pub async fn component_message(ctx: &Context, component: &DynamicObject, action: Action) -> WatchResult<Outcome> {
    let details = ctx.store.component_details(component).await?;
    let ns = component.metadata.namespace.clone().unwrap_or_default();
    Ok(Outcome::Emit(Message::new(message_kind::COMPONENT, action, details).in_namespace(ns)))
}

/// Look up the owning component named by a dependent's back-reference and report it
/// as updated. The dependent's own action never leaks through: a deleted pod still
/// means its component changed.
pub async fn resolve_owner(ctx: &Context, namespace: Option<&str>, owner: Option<&str>) -> WatchResult<Outcome> {
    let Some(owner) = owner.filter(|o| !o.is_empty()) else {
        return Ok(Outcome::Suppressed);
    };
    let target = ObjectRef::of(ResourceKindTag::Component, namespace, owner);
    debug!(owner = %target, "resolving owner");
    let component: DynamicObject = ctx.store.get(&target).await?.decode(ResourceKindTag::Component)?;
    component_message(ctx, &component, Action::Update).await
}
