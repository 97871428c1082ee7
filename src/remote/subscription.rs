//! Push subscription channel
//!
//! A subscription delivers snapshots for one document: once immediately on
//! registration, then once per remote change, in the order the store applied
//! them. Cancellation is an explicit handle the owning screen keeps; after
//! `unsubscribe()` the publisher drops the channel and no further events
//! arrive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use crate::error::SyncError;

/// One push event for a subscribed document.
#[derive(Debug, Clone)]
pub enum SnapshotEvent {
    /// Current remote state of the document
    Snapshot(serde_json::Value),
    /// The document does not exist
    Missing,
    /// Terminal failure; no further events will be delivered
    Error(SyncError),
}

/// Cancellation handle for a subscription.
///
/// Cloneable so the owning screen can keep one while the pump task holds
/// another. Cancelling is idempotent.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    active: Arc<AtomicBool>,
    cancelled: Arc<Notify>,
}

impl SubscriptionHandle {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
            cancelled: Arc::new(Notify::new()),
        }
    }

    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::SeqCst);
        // Stores a wake permit, so a receiver parked in `recv` (or one that
        // parks later) observes the cancellation instead of waiting for the
        // next publish.
        self.cancelled.notify_one();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn wait_cancelled(&self) {
        self.cancelled.notified().await;
    }
}

impl Default for SubscriptionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a push channel for one document.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<SnapshotEvent>,
    handle: SubscriptionHandle,
}

impl Subscription {
    pub fn new(events: mpsc::UnboundedReceiver<SnapshotEvent>, handle: SubscriptionHandle) -> Self {
        Self { events, handle }
    }

    /// Next event, or `None` once the channel is closed or cancelled.
    pub async fn next_event(&mut self) -> Option<SnapshotEvent> {
        if !self.handle.is_active() {
            return None;
        }
        tokio::select! {
            event = self.events.recv() => {
                let event = event?;
                if !self.handle.is_active() {
                    return None;
                }
                Some(event)
            }
            _ = self.handle.wait_cancelled() => None,
        }
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }
}

/// Publisher-side pair for a subscription channel.
pub fn channel() -> (mpsc::UnboundedSender<SnapshotEvent>, Subscription) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SubscriptionHandle::new();
    (tx, Subscription::new(rx, handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (tx, mut sub) = channel();
        tx.send(SnapshotEvent::Missing).expect("send");
        tx.send(SnapshotEvent::Snapshot(serde_json::json!({"n": 1})))
            .expect("send");

        assert!(matches!(sub.next_event().await, Some(SnapshotEvent::Missing)));
        match sub.next_event().await {
            Some(SnapshotEvent::Snapshot(doc)) => assert_eq!(doc["n"], 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let (tx, mut sub) = channel();
        let handle = sub.handle();
        tx.send(SnapshotEvent::Missing).expect("send");
        handle.unsubscribe();

        assert!(sub.next_event().await.is_none());
        assert!(!handle.is_active());
    }

    #[tokio::test]
    async fn test_unsubscribe_wakes_parked_receiver() {
        let (tx, mut sub) = channel();
        let handle = sub.handle();

        // No events queued: the receiver parks in recv.
        let receiver = tokio::spawn(async move { sub.next_event().await });
        tokio::task::yield_now().await;

        handle.unsubscribe();
        let event = receiver.await.expect("join");
        assert!(event.is_none());
        drop(tx);
    }

    #[tokio::test]
    async fn test_closed_channel_ends_subscription() {
        let (tx, mut sub) = channel();
        drop(tx);
        assert!(sub.next_event().await.is_none());
    }
}
