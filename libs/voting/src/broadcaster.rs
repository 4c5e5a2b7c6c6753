//! Per-session publish/subscribe hub
//!
//! Every session gets its own `tokio::sync::broadcast` channel. Publishing
//! never waits on subscribers: a subscriber that falls more than the channel
//! capacity behind skips the oldest events and keeps going.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::SessionEvent;

#[derive(Clone)]
pub struct Broadcaster {
    channels: Arc<RwLock<HashMap<i64, broadcast::Sender<SessionEvent>>>>,
    capacity: usize,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Register a new connection for a session's events.
    ///
    /// Only events published after this call are delivered. The connection
    /// is unsubscribed when the returned [`Subscription`] is dropped.
    pub fn subscribe(&self, session_id: i64) -> Subscription {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let receiver = channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let subscription = Subscription {
            id: Uuid::new_v4(),
            session_id,
            receiver,
        };
        debug!(
            "Subscriber {} joined session {}",
            subscription.id, session_id
        );

        subscription
    }

    /// Fan an event out to the session's current subscribers.
    ///
    /// Returns the number of subscribers the event was queued for.
    pub fn publish(&self, session_id: i64, event: SessionEvent) -> usize {
        let sender = {
            let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
            channels.get(&session_id).cloned()
        };

        let Some(sender) = sender else {
            return 0;
        };

        let name = event.name();
        match sender.send(event) {
            Ok(delivered) => {
                debug!(
                    "Published {} to {} subscriber(s) of session {}",
                    name, delivered, session_id
                );
                delivered
            }
            Err(_) => {
                // nobody listening any more
                self.prune(session_id);
                0
            }
        }
    }

    pub fn subscriber_count(&self, session_id: i64) -> usize {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        channels
            .get(&session_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Drop the session's channel; subscribers see the end of the stream
    /// once they have drained the events already queued.
    pub fn close(&self, session_id: i64) {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        if channels.remove(&session_id).is_some() {
            debug!("Closed event channel of session {}", session_id);
        }
    }

    fn prune(&self, session_id: i64) {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        if channels
            .get(&session_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(&session_id);
        }
    }
}

/// A connection's view of one session's event stream
pub struct Subscription {
    pub id: Uuid,
    pub session_id: i64,
    receiver: broadcast::Receiver<SessionEvent>,
}

impl Subscription {
    /// Next event, or `None` once the session's channel is closed.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Subscriber {} of session {} skipped {} event(s)",
                        self.id, self.session_id, skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next queued event without waiting
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
