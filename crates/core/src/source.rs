//! Inbound collaborator: per-kind change subscriptions.

use tokio::sync::{mpsc, oneshot};

use crate::{Action, RawObject, ResourceKindTag, WatchResult};

/// A single `(action, object)` pair delivered by a subscription.
#[derive(Debug, Clone)]
pub struct SourceEvent {
    pub action: Action,
    pub object: RawObject,
}

impl SourceEvent {
    pub fn new(action: Action, object: RawObject) -> Self { Self { action, object } }
}

/// Cancellation handle releasing a subscription. Dropping it cancels too.
#[derive(Debug)]
pub struct CancelHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl CancelHandle {
    /// Create a handle and the receiver the producing task should select on.
    pub fn pair() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Handle for subscriptions whose producer stops on its own when the receiver drops.
    pub fn noop() -> Self { Self { tx: None } }

    pub fn cancel(mut self) {
        if let Some(tx) = self.tx.take() { let _ = tx.send(()); }
    }
}

/// Live subscription to one kind. Events arrive in source order until cancelled.
pub struct Subscription {
    pub rx: mpsc::Receiver<SourceEvent>,
    pub cancel: CancelHandle,
}

/// Supplier of raw change streams, one subscription per kind.
///
/// Implementations own resync and reconnect; the engine only consumes.
#[async_trait::async_trait]
pub trait ChangeSource: Send + Sync {
    /// Establish a subscription. `buffer` bounds the in-flight events between
    /// the source and the dispatch task.
    async fn subscribe(&self, kind: ResourceKindTag, buffer: usize) -> WatchResult<Subscription>;
}
