use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use pulse_core::Message;
use tokio::sync::Notify;

/// Bounded FIFO of outbound messages shared by every dispatch task.
///
/// `push` never blocks: when full, the oldest queued message is dropped and counted.
#[derive(Clone)]
pub struct OutboundSink {
    inner: Arc<Inner>,
}

struct Inner {
    queue: Mutex<VecDeque<Message>>,
    cap: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl OutboundSink {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(cap.min(1024))),
                cap,
                dropped: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.inner.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a message. Returns `false` if the sink is closed or the message is the
    /// empty sentinel; neither is ever forwarded.
    pub fn push(&self, msg: Message) -> bool {
        if msg.is_empty() || self.is_closed() {
            return false;
        }
        let depth = {
            let mut q = self.queue();
            if q.len() >= self.inner.cap && q.pop_front().is_some() {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("pulse_sink_dropped_total", 1u64);
            }
            q.push_back(msg);
            q.len()
        };
        metrics::gauge!("pulse_sink_depth", depth as f64);
        self.inner.notify.notify_one();
        true
    }

    pub fn try_recv(&self) -> Option<Message> {
        self.queue().pop_front()
    }

    /// Next message in delivery order; `None` once closed and drained.
    pub async fn recv(&self) -> Option<Message> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(m) = self.try_recv() {
                return Some(m);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<Message> {
        self.queue().drain(..).collect()
    }

    /// Reject further pushes and wake every waiting consumer.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool { self.inner.closed.load(Ordering::SeqCst) }
    pub fn len(&self) -> usize { self.queue().len() }
    pub fn is_empty(&self) -> bool { self.queue().is_empty() }
    pub fn capacity(&self) -> usize { self.inner.cap }
    pub fn dropped(&self) -> u64 { self.inner.dropped.load(Ordering::Relaxed) }
}

impl Default for OutboundSink {
    fn default() -> Self { Self::with_capacity(2048) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::Action;
    use serde_json::json;
    use std::time::Duration;

    fn msg(i: usize) -> Message {
        Message::new("Node", Action::Update, json!({ "i": i }))
    }

    #[test]
    fn overflow_drops_oldest() {
        let sink = OutboundSink::with_capacity(3);
        for i in 0..5 {
            assert!(sink.push(msg(i)));
        }
        assert_eq!(sink.len(), 3);
        assert_eq!(sink.dropped(), 2);
        let kept: Vec<_> = sink.drain().into_iter().map(|m| m.data.unwrap()["i"].as_u64().unwrap()).collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[test]
    fn empty_message_and_closed_sink_are_rejected() {
        let sink = OutboundSink::with_capacity(4);
        assert!(!sink.push(Message::empty()));
        sink.close();
        assert!(!sink.push(msg(1)));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn recv_waits_for_push() {
        let sink = OutboundSink::with_capacity(4);
        let consumer = sink.clone();
        let h = tokio::spawn(async move { consumer.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        sink.push(msg(7));
        let got = tokio::time::timeout(Duration::from_secs(1), h).await.unwrap().unwrap();
        assert_eq!(got.unwrap().data.unwrap()["i"], 7);
    }

    #[tokio::test]
    async fn close_wakes_consumer_after_drain() {
        let sink = OutboundSink::with_capacity(4);
        sink.push(msg(1));
        let consumer = sink.clone();
        let h = tokio::spawn(async move {
            let mut n = 0;
            while consumer.recv().await.is_some() {
                n += 1;
            }
            n
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        sink.close();
        let n = tokio::time::timeout(Duration::from_secs(1), h).await.unwrap().unwrap();
        assert_eq!(n, 1);
    }
}
