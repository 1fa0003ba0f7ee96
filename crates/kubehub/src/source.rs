use futures::StreamExt;
use kube::{
    api::{Api, ListParams},
    core::DynamicObject,
    runtime::{watcher, WatchStreamExt},
    Client,
};
use pulse_core::source::{CancelHandle, ChangeSource, SourceEvent, Subscription};
use pulse_core::{ResourceKindTag, WatchError, WatchResult};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::InformerState;

/// Change source backed by one list+watch per kind across all namespaces.
#[derive(Clone)]
pub struct KubeSource {
    client: Client,
}

impl KubeSource {
    pub fn new(client: Client) -> Self { Self { client } }

    fn api(&self, kind: ResourceKindTag) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &kind.api_resource())
    }
}

#[async_trait::async_trait]
impl ChangeSource for KubeSource {
    async fn subscribe(&self, kind: ResourceKindTag, buffer: usize) -> WatchResult<Subscription> {
        let api = self.api(kind);
        // A CRD that is not installed (or not readable) fails here instead of
        // spinning in the watcher's backoff forever.
        api.list(&ListParams::default().limit(1))
            .await
            .map_err(|e| WatchError::Setup { kind, reason: e.to_string() })?;
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (cancel, cancel_rx) = CancelHandle::pair();
        tokio::spawn(pump(kind, api, tx, cancel_rx));
        Ok(Subscription { rx, cancel })
    }
}

async fn pump(
    kind: ResourceKindTag,
    api: Api<DynamicObject>,
    tx: mpsc::Sender<SourceEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    let mut state = InformerState::default();
    info!(kind = %kind, "watcher started");
    loop {
        tokio::select! {
            _ = &mut cancel_rx => {
                debug!(kind = %kind, "watcher cancelled");
                break;
            }
            next = stream.next() => {
                match next {
                    Some(Ok(ev)) => {
                        if let watcher::Event::Restarted(list) = &ev {
                            debug!(kind = %kind, count = list.len(), "watch restart");
                            metrics::counter!("pulse_watch_restarts_total", 1u64, "kind" => kind.to_string());
                        }
                        for out in state.on_event(kind, ev) {
                            if tx.send(out).await.is_err() {
                                debug!(kind = %kind, "subscriber gone; stopping watcher");
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(kind = %kind, error = %e, "watch stream error; backing off");
                        metrics::counter!("pulse_watch_errors_total", 1u64, "kind" => kind.to_string());
                    }
                    None => {
                        warn!(kind = %kind, "watcher stream ended");
                        break;
                    }
                }
            }
        }
    }
    info!(kind = %kind, known = state.len(), "watcher stopped");
}
