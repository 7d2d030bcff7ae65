use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use agrelay_types::{EventPayload, SessionEvent};

/// Bound on each subscriber's queue; overflow drops the subscriber so a
/// stalled client cannot block the rest
const QUEUE_CAPACITY: usize = 256;

/// One client's live subscription
pub struct Subscription {
    pub client_id: Uuid,
    pub rx: mpsc::Receiver<SessionEvent>,
}

struct SubscriberEntry {
    session_id: String,
    tx: mpsc::Sender<SessionEvent>,
}

/// client ↔ session mapping with per-subscriber serial delivery
#[derive(Default)]
pub struct SubscriberRegistry {
    inner: Mutex<HashMap<Uuid, SubscriberEntry>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, session_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let client_id = Uuid::new_v4();
        self.inner.lock().unwrap().insert(
            client_id,
            SubscriberEntry {
                session_id: session_id.to_string(),
                tx,
            },
        );
        Subscription { client_id, rx }
    }

    /// Remove the client; returns its session id if it was subscribed
    pub fn unsubscribe(&self, client_id: Uuid) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .remove(&client_id)
            .map(|entry| entry.session_id)
    }

    /// Targeted delivery (used for the on-subscribe replay)
    pub fn send_to(&self, client_id: Uuid, event: SessionEvent) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.get(&client_id)
            && entry.tx.try_send(event).is_err()
        {
            debug!(%client_id, "dropping subscriber (queue overflow or closed)");
            inner.remove(&client_id);
        }
    }

    /// Fan an event out to every subscriber of the session. Subscribers
    /// whose queue is full or closed are dropped on the spot.
    pub fn broadcast(&self, event: &SessionEvent) {
        let mut inner = self.inner.lock().unwrap();
        let mut dead = Vec::new();

        for (client_id, entry) in inner.iter() {
            if entry.session_id != event.session_id {
                continue;
            }
            if entry.tx.try_send(event.clone()).is_err() {
                dead.push(*client_id);
            }
        }

        for client_id in dead {
            debug!(%client_id, "dropping subscriber (queue overflow or closed)");
            inner.remove(&client_id);
        }
    }

    /// Heartbeat every live subscriber on its own session id
    pub fn heartbeat_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        let mut dead = Vec::new();

        for (client_id, entry) in inner.iter() {
            let event = SessionEvent::new(entry.session_id.clone(), EventPayload::Heartbeat);
            if entry.tx.try_send(event).is_err() {
                dead.push(*client_id);
            }
        }

        for client_id in dead {
            inner.remove(&client_id);
        }
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|entry| entry.session_id == session_id)
            .count()
    }

    /// Every session that currently has at least one subscriber
    pub fn subscribed_sessions(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut sessions: Vec<String> =
            inner.values().map(|e| e.session_id.clone()).collect();
        sessions.sort();
        sessions.dedup();
        sessions
    }

    /// Drop every subscriber (graceful shutdown closes all streams)
    pub fn close_all(&self) {
        self.inner.lock().unwrap().clear();
    }
}
