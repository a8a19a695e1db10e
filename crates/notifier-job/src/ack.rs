//! Delivery acknowledgment correlation.
//!
//! One dispatch task feeds `MessageAck` events into an [`AckTracker`]; the
//! send loop registers a waiter per outbound message and waits on it with a
//! bound. Every waiter resolves at most once: on a matching confirmed ack, or
//! on timeout, after which it is removed and later acks are ignored.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::{StreamExt, stream::BoxStream};
use notifier_core::{AckLevel, MessageId, TransportEvent};
use tokio::{sync::oneshot, task::JoinHandle};

/// How a wait for acknowledgment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// A matching ack at or above server level arrived.
    Confirmed(AckLevel),
    /// No matching ack arrived within the bound.
    TimedOut,
    /// The waiter was discarded by a reset before resolving.
    Abandoned,
}

/// Pending wait for one message's acknowledgment.
#[derive(Debug)]
pub struct AckWaiter {
    id: MessageId,
    rx: oneshot::Receiver<AckLevel>,
}

impl AckWaiter {
    /// Message this waiter is for.
    #[must_use]
    pub const fn id(&self) -> &MessageId {
        &self.id
    }
}

#[derive(Default)]
struct State {
    waiters: HashMap<MessageId, oneshot::Sender<AckLevel>>,
    /// Confirmed acks that arrived before their waiter was registered.
    /// Cleared on every reset, so nothing outlives one send cycle.
    parked: HashMap<MessageId, AckLevel>,
}

/// Correlation map from outbound message id to its single waiter.
#[derive(Default)]
pub struct AckTracker {
    state: Mutex<State>,
}

impl AckTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop every waiter and parked ack. Called before each send.
    pub fn reset(&self) {
        let mut state = self.state();
        state.waiters.clear();
        state.parked.clear();
    }

    /// Register the waiter for `id`.
    ///
    /// An ack parked for `id` since the last reset resolves it immediately.
    pub fn register(&self, id: MessageId) -> AckWaiter {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state();
        if let Some(level) = state.parked.remove(&id) {
            let _ = tx.send(level);
        } else {
            state.waiters.insert(id.clone(), tx);
        }
        AckWaiter { id, rx }
    }

    /// Feed one ack in. Returns true if it resolved a waiter.
    pub fn resolve(&self, id: &MessageId, level: AckLevel) -> bool {
        if !level.is_confirmed() {
            if level == AckLevel::Error {
                tracing::warn!(message_id = %id, "Transport reported delivery error");
            }
            return false;
        }

        let mut state = self.state();
        if let Some(tx) = state.waiters.remove(id) {
            drop(state);
            tracing::debug!(message_id = %id, %level, "Ack matched");
            return tx.send(level).is_ok();
        }

        // Between `send_text` returning and `register`, the ack for the
        // in-flight message has nowhere to go yet.
        state.parked.entry(id.clone()).or_insert(level);
        false
    }

    /// Remove the waiter for `id`, if still registered.
    pub fn remove(&self, id: &MessageId) -> bool {
        self.state().waiters.remove(id).is_some()
    }

    /// Number of registered waiters.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state().waiters.len()
    }

    /// Wait up to `timeout` for `waiter` to resolve.
    pub async fn wait(&self, waiter: AckWaiter, timeout: Duration) -> AckOutcome {
        let AckWaiter { id, rx } = waiter;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(level)) => AckOutcome::Confirmed(level),
            Ok(Err(_)) => AckOutcome::Abandoned,
            Err(_) => {
                self.remove(&id);
                AckOutcome::TimedOut
            }
        }
    }

    /// Spawn the dispatch loop feeding `MessageAck` events into the tracker.
    pub fn spawn_dispatch(
        self: &Arc<Self>,
        mut events: BoxStream<'static, TransportEvent>,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let TransportEvent::MessageAck { id, level } = event {
                    tracker.resolve(&id, level);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(20);

    #[tokio::test(start_paused = true)]
    async fn test_matching_ack_confirms() {
        let tracker = AckTracker::new();
        let waiter = tracker.register(MessageId::new("m1"));
        assert!(tracker.resolve(&MessageId::new("m1"), AckLevel::Device));
        assert_eq!(
            tracker.wait(waiter, TIMEOUT).await,
            AckOutcome::Confirmed(AckLevel::Device)
        );
        assert_eq!(tracker.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_ack_does_not_resolve() {
        let tracker = AckTracker::new();
        let waiter = tracker.register(MessageId::new("m2"));
        assert!(!tracker.resolve(&MessageId::new("m1"), AckLevel::Read));
        assert_eq!(tracker.wait(waiter, TIMEOUT).await, AckOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_level_does_not_confirm() {
        let tracker = AckTracker::new();
        let waiter = tracker.register(MessageId::new("m1"));
        assert!(!tracker.resolve(&MessageId::new("m1"), AckLevel::Pending));
        assert!(!tracker.resolve(&MessageId::new("m1"), AckLevel::Error));
        assert_eq!(tracker.wait(waiter, TIMEOUT).await, AckOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_ack_after_timeout_is_ignored() {
        let tracker = AckTracker::new();
        let id = MessageId::new("m1");
        let waiter = tracker.register(id.clone());
        assert_eq!(tracker.wait(waiter, TIMEOUT).await, AckOutcome::TimedOut);

        assert!(!tracker.resolve(&id, AckLevel::Server));
        assert_eq!(tracker.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_ack_is_parked_until_register() {
        let tracker = AckTracker::new();
        assert!(!tracker.resolve(&MessageId::new("m1"), AckLevel::Server));

        let waiter = tracker.register(MessageId::new("m1"));
        assert_eq!(
            tracker.wait(waiter, TIMEOUT).await,
            AckOutcome::Confirmed(AckLevel::Server)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_drops_parked_and_waiters() {
        let tracker = AckTracker::new();
        tracker.resolve(&MessageId::new("stale"), AckLevel::Server);
        let waiter = tracker.register(MessageId::new("m1"));

        tracker.reset();
        assert_eq!(tracker.pending(), 0);
        assert_eq!(tracker.wait(waiter, TIMEOUT).await, AckOutcome::Abandoned);

        let waiter = tracker.register(MessageId::new("stale"));
        assert_eq!(tracker.wait(waiter, TIMEOUT).await, AckOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_loop_resolves_from_stream() {
        let hub = notifier_core::EventHub::new();
        let tracker = Arc::new(AckTracker::new());
        let handle = tracker.spawn_dispatch(hub.subscribe());

        let waiter = tracker.register(MessageId::new("m7"));
        hub.push(TransportEvent::Ready);
        hub.push(TransportEvent::MessageAck {
            id: MessageId::new("m7"),
            level: AckLevel::Server,
        });

        assert_eq!(
            tracker.wait(waiter, TIMEOUT).await,
            AckOutcome::Confirmed(AckLevel::Server)
        );
        hub.push_closed();
        handle.await.unwrap();
    }
}
