//! Event fan-out: the [`EventSink`] behind every connection.
//!
//! Observer connections share one broadcast channel; each holds a receiver
//! drained by its own forwarder task. Sender connections register an mpsc
//! channel under their participant id. Serialized events are plain JSON
//! text frames.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};

use troof_types::{EventSink, HubEvent, ParticipantId};

/// Id of one WebSocket connection, unique for the process lifetime.
pub type ConnectionId = u64;

struct Route {
    connection: ConnectionId,
    tx: mpsc::UnboundedSender<String>,
}

pub struct FanOut {
    observers: broadcast::Sender<String>,
    participants: Mutex<HashMap<ParticipantId, Route>>,
}

impl FanOut {
    /// Create a fan-out whose observer channel buffers `capacity` events
    /// per slow receiver before it lags.
    pub fn new(capacity: usize) -> Self {
        let (observers, _) = broadcast::channel(capacity.max(1));
        Self {
            observers,
            participants: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.observers.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.receiver_count()
    }

    /// Route `participant`'s direct events to `connection`, replacing any
    /// earlier connection for the same id.
    pub fn register(
        &self,
        participant: ParticipantId,
        connection: ConnectionId,
    ) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self
            .participants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(participant.clone(), Route { connection, tx });
        if let Some(previous) = previous {
            tracing::debug!(
                participant_id = %participant,
                replaced = previous.connection,
                connection,
                "participant route replaced"
            );
        }
        rx
    }

    /// Drop the route if it still belongs to `connection`. Returns whether
    /// it did; a newer connection for the same participant is left alone.
    pub fn unregister(&self, participant: &ParticipantId, connection: ConnectionId) -> bool {
        let mut routes = self
            .participants
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match routes.get(participant) {
            Some(route) if route.connection == connection => {
                routes.remove(participant);
                true
            }
            _ => false,
        }
    }

    fn encode(event: &HubEvent) -> Option<String> {
        match serde_json::to_string(event) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!(kind = event.kind(), error = %e, "failed to encode event");
                None
            }
        }
    }
}

impl EventSink for FanOut {
    fn publish(&self, event: &HubEvent) {
        if let Some(json) = Self::encode(event) {
            // No observers connected is not an error.
            let _ = self.observers.send(json);
        }
    }

    fn deliver(&self, participant: &ParticipantId, event: &HubEvent) -> bool {
        let Some(json) = Self::encode(event) else {
            return false;
        };
        let routes = self
            .participants
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match routes.get(participant) {
            Some(route) => route.tx.send(json).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use troof_types::MeetingId;

    fn event() -> HubEvent {
        HubEvent::TooManyRequests {
            meeting_id: MeetingId::new("m1"),
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_observer() {
        let fanout = FanOut::new(16);
        let mut a = fanout.subscribe();
        let mut b = fanout.subscribe();
        fanout.publish(&event());
        let json = a.recv().await.unwrap();
        assert!(json.contains("\"type\":\"too_many_requests\""));
        assert_eq!(b.recv().await.unwrap(), json);
    }

    #[test]
    fn publish_without_observers_is_silent() {
        let fanout = FanOut::new(16);
        fanout.publish(&event());
        assert_eq!(fanout.observer_count(), 0);
    }

    #[tokio::test]
    async fn deliver_routes_to_latest_connection() {
        let fanout = FanOut::new(16);
        let p1 = ParticipantId::new("p1");
        let mut old = fanout.register(p1.clone(), 1);
        let mut new = fanout.register(p1.clone(), 2);

        assert!(fanout.deliver(&p1, &event()));
        assert!(new.recv().await.is_some());
        assert!(old.recv().await.is_none(), "replaced sender was dropped");

        assert!(!fanout.unregister(&p1, 1), "stale connection cannot unregister");
        assert!(fanout.unregister(&p1, 2));
        assert!(!fanout.deliver(&p1, &event()));
    }

    #[test]
    fn deliver_to_closed_receiver_fails() {
        let fanout = FanOut::new(16);
        let p1 = ParticipantId::new("p1");
        drop(fanout.register(p1.clone(), 1));
        assert!(!fanout.deliver(&p1, &event()));
    }
}
