//! Nullable fan-out: record events instead of sending them.

use std::collections::HashSet;
use std::sync::Mutex;
use troof_types::{EventSink, HubEvent, ParticipantId};

/// An [`EventSink`] that records every published and delivered event.
///
/// By default every participant counts as reachable; call
/// [`NullEventSink::disconnect`] to make `deliver` report a missing
/// connection.
pub struct NullEventSink {
    published: Mutex<Vec<HubEvent>>,
    delivered: Mutex<Vec<(ParticipantId, HubEvent)>>,
    unreachable: Mutex<HashSet<ParticipantId>>,
}

impl NullEventSink {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
            unreachable: Mutex::new(HashSet::new()),
        }
    }

    /// All events sent to observers, in order.
    pub fn published(&self) -> Vec<HubEvent> {
        self.published.lock().unwrap().clone()
    }

    /// Wire `type` of every published event, in order.
    pub fn published_kinds(&self) -> Vec<&'static str> {
        self.published.lock().unwrap().iter().map(HubEvent::kind).collect()
    }

    /// All events sent to individual participants, in order.
    pub fn delivered(&self) -> Vec<(ParticipantId, HubEvent)> {
        self.delivered.lock().unwrap().clone()
    }

    /// Drain and return the published events.
    pub fn take_published(&self) -> Vec<HubEvent> {
        std::mem::take(&mut *self.published.lock().unwrap())
    }

    pub fn disconnect(&self, participant: &ParticipantId) {
        self.unreachable.lock().unwrap().insert(participant.clone());
    }

    /// Clear all recorded state.
    pub fn reset(&self) {
        self.published.lock().unwrap().clear();
        self.delivered.lock().unwrap().clear();
    }
}

impl Default for NullEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for NullEventSink {
    fn publish(&self, event: &HubEvent) {
        self.published.lock().unwrap().push(event.clone());
    }

    fn deliver(&self, participant: &ParticipantId, event: &HubEvent) -> bool {
        if self.unreachable.lock().unwrap().contains(participant) {
            return false;
        }
        self.delivered
            .lock()
            .unwrap()
            .push((participant.clone(), event.clone()));
        true
    }
}
