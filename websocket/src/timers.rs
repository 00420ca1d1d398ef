//! Detection-window timers.
//!
//! One task per issued challenge sleeps for the advisory detection window
//! and then asks the hub whether the challenge is still outstanding. The
//! task is aborted as soon as the challenge reaches a terminal state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use troof_presence::PresenceHub;
use troof_types::ChallengeId;

#[derive(Default)]
pub struct DetectionTimers {
    handles: Mutex<HashMap<ChallengeId, JoinHandle<()>>>,
}

impl DetectionTimers {
    pub fn new() -> Self {
        Self::default()
    }

    fn handles(&self) -> std::sync::MutexGuard<'_, HashMap<ChallengeId, JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the detection window for `id`. Must run inside a tokio runtime.
    pub fn schedule(self: &Arc<Self>, hub: Arc<PresenceHub>, id: ChallengeId, window: Duration) {
        let timers = Arc::clone(self);
        let task_id = id.clone();
        // Held across the spawn so the task cannot remove its entry first.
        let mut handles = self.handles();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            timers.handles().remove(&task_id);
            if hub.detection_timeout(&task_id).is_some() {
                tracing::debug!(challenge_id = %task_id, "detection window elapsed without response");
            }
        });
        if let Some(previous) = handles.insert(id, handle) {
            previous.abort();
        }
    }

    /// Abort the timer for `id`. Returns whether one was pending.
    pub fn cancel(&self, id: &ChallengeId) -> bool {
        match self.handles().remove(id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort the timers of every id in `ids`.
    pub fn cancel_many(&self, ids: &[ChallengeId]) -> usize {
        let mut handles = self.handles();
        ids.iter()
            .filter_map(|id| handles.remove(id))
            .map(|handle| handle.abort())
            .count()
    }

    pub fn cancel_all(&self) {
        for (_, handle) in self.handles().drain() {
            handle.abort();
        }
    }

    pub fn pending(&self) -> usize {
        self.handles().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use troof_nullables::{NullClock, NullEventSink, NullRandom, NullStore};
    use troof_presence::{
        EnrollmentCode, HubServices, SenderHello, StaticEnrollment, VerifyRequest, VerifyTarget,
    };
    use troof_types::{HubEvent, HubParams, MeetingId, ParticipantId};

    fn hub_with_challenge() -> (Arc<PresenceHub>, Arc<NullEventSink>, ChallengeId) {
        let sink = Arc::new(NullEventSink::new());
        let store = Arc::new(NullStore::new());
        let hub = PresenceHub::new(
            HubParams::default(),
            HubServices {
                clock: Arc::new(NullClock::new(1_000)),
                random: Arc::new(NullRandom::new()),
                sink: sink.clone(),
                key_store: store.clone(),
                roster_store: store,
                enrollment: Arc::new(StaticEnrollment::new(vec![EnrollmentCode {
                    code: "C".into(),
                    participant_id: "p1".into(),
                    display_name: "P1".into(),
                }])),
            },
        )
        .unwrap();
        hub.announce(SenderHello {
            enroll_code: Some("C".into()),
            ..SenderHello::default()
        })
        .unwrap();
        let payload = hub
            .request_verification(VerifyRequest {
                meeting_id: MeetingId::new("m1"),
                target: VerifyTarget::Participant(ParticipantId::new("p1")),
                nonce: None,
                ts: None,
                pattern: None,
            })
            .unwrap();
        sink.reset();
        (Arc::new(hub), sink, payload.challenge_id)
    }

    fn advisory_count(sink: &NullEventSink) -> usize {
        sink.published()
            .iter()
            .filter(|e| matches!(e, HubEvent::VerificationResult(r) if r.advisory))
            .count()
    }

    #[tokio::test]
    async fn fires_after_window() {
        let (hub, sink, id) = hub_with_challenge();
        let timers = Arc::new(DetectionTimers::new());
        timers.schedule(hub, id, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(advisory_count(&sink), 1);
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test]
    async fn cancelled_timer_stays_silent() {
        let (hub, sink, id) = hub_with_challenge();
        let timers = Arc::new(DetectionTimers::new());
        timers.schedule(hub, id.clone(), Duration::from_millis(50));
        assert!(timers.cancel(&id));
        assert!(!timers.cancel(&id));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(advisory_count(&sink), 0);
    }

    #[tokio::test]
    async fn cancel_many_reports_count() {
        let (hub, _sink, id) = hub_with_challenge();
        let timers = Arc::new(DetectionTimers::new());
        timers.schedule(hub.clone(), id.clone(), Duration::from_secs(60));
        timers.schedule(hub, ChallengeId::new("other"), Duration::from_secs(60));
        assert_eq!(timers.cancel_many(&[id, ChallengeId::new("missing")]), 1);
        assert_eq!(timers.pending(), 1);
        timers.cancel_all();
        assert_eq!(timers.pending(), 0);
    }
}
