//! `PresenceHub`: the presence-verification core.
//!
//! Owns the four state maps (directory, meetings, challenges, buckets),
//! each behind its own mutex. A guard is held for one whole logical
//! operation and never while another is taken. Events describing a map are
//! handed to the [`EventSink`] before its guard is released, so observers
//! see them in the order the state changed. Sinks must not block or call
//! back into the hub.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use troof_crypto::{random_hex, CryptoError, P256PublicKey, RandomSource};
use troof_store::{KeyStore, RosterStore};
use troof_types::{
    ChallengeId, ChallengePayload, Clock, EventSink, ExternalIdentity, HubEvent, HubParams,
    MeetingId, ParticipantId, ParticipantView, Pattern, PresenceView, Timestamp,
    VerificationReport, Verdict, VerdictReason,
};
use troof_utils::HubCounters;

use crate::challenge::{ChallengeBook, ChallengeRequest, ChallengeState};
use crate::directory::{Announcement, Directory};
use crate::enrollment::EnrollmentAuthority;
use crate::limiter::RateLimiter;
use crate::roster::{RosterBook, RosterInput};
use crate::verifier::{
    assess, canonical_payload, update_trust, AssessContext, CanonicalFields, SignedResponse,
};
use crate::{ConsumeError, PresenceError};

/// Random bytes in a challenge id (96 bits).
const CHALLENGE_ID_BYTES: usize = 12;
/// Random bytes in a server-minted nonce.
const NONCE_BYTES: usize = 4;
/// Random bytes in a generated participant id.
const PARTICIPANT_ID_BYTES: usize = 3;
/// Fresh ids drawn before giving up on a colliding challenge id.
const MAX_ID_ATTEMPTS: usize = 8;

const STAT_NAMES: &[&str] = &[
    "announces",
    "keys_registered",
    "rosters_applied",
    "challenges_issued",
    "rate_limited",
    "challenge_violations",
    "verifications_trusted",
    "verifications_untrusted",
    "detection_timeouts",
    "store_errors",
];

/// External collaborators of the hub.
#[derive(Clone)]
pub struct HubServices {
    pub clock: Arc<dyn Clock>,
    pub random: Arc<dyn RandomSource>,
    pub sink: Arc<dyn EventSink>,
    pub key_store: Arc<dyn KeyStore>,
    pub roster_store: Arc<dyn RosterStore>,
    pub enrollment: Arc<dyn EnrollmentAuthority>,
}

/// A sender's `role` announcement.
#[derive(Clone, Debug, Default)]
pub struct SenderHello {
    pub participant_id: Option<ParticipantId>,
    pub display_name: Option<String>,
    pub meeting_id: Option<MeetingId>,
    pub identities: Vec<ExternalIdentity>,
    pub enroll_code: Option<String>,
}

/// Who a `verify_now` is aimed at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyTarget {
    Participant(ParticipantId),
    Identity(ExternalIdentity),
}

impl std::fmt::Display for VerifyTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Participant(id) => write!(f, "participant {id}"),
            Self::Identity(identity) => write!(f, "{identity}"),
        }
    }
}

/// An observer's request to challenge a participant. Unset payload fields
/// are minted by the hub.
#[derive(Clone, Debug)]
pub struct VerifyRequest {
    pub meeting_id: MeetingId,
    pub target: VerifyTarget,
    pub nonce: Option<String>,
    pub ts: Option<String>,
    pub pattern: Option<Pattern>,
}

/// What one expiry sweep removed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_challenges: Vec<ChallengeId>,
    pub evicted_meetings: Vec<MeetingId>,
    pub pruned_buckets: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct PresenceHub {
    params: HubParams,
    directory: Mutex<Directory>,
    meetings: Mutex<RosterBook>,
    challenges: Mutex<ChallengeBook>,
    limiter: Mutex<RateLimiter>,
    services: HubServices,
    stats: HubCounters,
}

impl PresenceHub {
    /// Build a hub, loading stored keys and rosters.
    pub fn new(params: HubParams, services: HubServices) -> Result<Self, PresenceError> {
        let keys = services.key_store.load_keys()?;
        let meetings = RosterBook::from_stored(services.roster_store.load_meetings()?);
        tracing::info!(
            keys = keys.len(),
            meetings = meetings.len(),
            "presence hub state loaded"
        );
        Ok(Self {
            directory: Mutex::new(Directory::new(keys, params.trust_initial)),
            meetings: Mutex::new(meetings),
            challenges: Mutex::new(ChallengeBook::new(
                params.challenge_ttl_ms,
                params.challenge_grace_ms,
            )),
            limiter: Mutex::new(RateLimiter::new(
                params.bucket_capacity,
                params.bucket_refill_ms,
            )),
            params,
            services,
            stats: HubCounters::new(STAT_NAMES),
        })
    }

    pub fn params(&self) -> &HubParams {
        &self.params
    }

    pub fn stats(&self) -> &HubCounters {
        &self.stats
    }

    fn now(&self) -> Timestamp {
        self.services.clock.now()
    }

    fn publish_all(&self, events: Vec<HubEvent>) {
        for event in &events {
            self.services.sink.publish(event);
        }
    }

    fn save_keys(&self, directory: &Directory) {
        if let Err(e) = self.services.key_store.save_keys(directory.keys()) {
            self.stats.increment("store_errors");
            tracing::error!(error = %e, "failed to persist public keys");
        }
    }

    fn save_meetings(&self, meetings: &RosterBook) {
        if let Err(e) = self.services.roster_store.save_meetings(&meetings.to_stored()) {
            self.stats.increment("store_errors");
            tracing::error!(error = %e, "failed to persist meeting rosters");
        }
    }

    // ── Identity directory ───────────────────────────────────────────────

    /// Announce a sender connection. Returns its view as now stored.
    ///
    /// A valid enrollment code fixes the participant id and display name
    /// and marks it enrolled; without one the sender is unenrolled and any
    /// key stored under its id is revoked.
    pub fn announce(&self, hello: SenderHello) -> Result<ParticipantView, PresenceError> {
        let enrolled = hello
            .enroll_code
            .as_deref()
            .filter(|code| !code.trim().is_empty())
            .and_then(|code| {
                let found = self.services.enrollment.resolve(code);
                if found.is_none() {
                    tracing::warn!("unknown enrollment code presented");
                }
                found
            });

        let (participant_id, display_name, is_enrolled) = match enrolled {
            Some(identity) => (identity.participant_id, identity.display_name, true),
            None => {
                let id = match hello.participant_id {
                    Some(id) if !id.as_str().trim().is_empty() => id,
                    _ => ParticipantId::new(format!(
                        "p-{}",
                        random_hex(self.services.random.as_ref(), PARTICIPANT_ID_BYTES)?
                    )),
                };
                let name = hello
                    .display_name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| id.to_string());
                (id, name, false)
            }
        };

        let announcement = Announcement {
            participant_id: participant_id.clone(),
            display_name,
            enrolled: is_enrolled,
            meeting_id: hello.meeting_id,
            identities: hello.identities,
        };

        let (participant, view) = {
            let mut directory = lock(&self.directory);
            let outcome = directory.announce(announcement);
            let view = directory.view(&outcome.participant);
            if outcome.joined {
                self.services
                    .sink
                    .publish(&HubEvent::ParticipantJoin { info: view.clone() });
            }
            if outcome.key_cleared {
                self.save_keys(&directory);
                self.services.sink.publish(&HubEvent::PubkeyClear {
                    participant_id: participant_id.clone(),
                });
            }
            (outcome.participant, view)
        };

        {
            let mut meetings = lock(&self.meetings);
            let bound = meetings.bind_live(&participant);
            if !bound.is_empty() {
                self.save_meetings(&meetings);
                self.publish_all(bound);
            }
        }

        self.stats.increment("announces");
        tracing::info!(
            participant_id = %participant_id,
            enrolled = is_enrolled,
            meeting_id = ?participant.meeting_id,
            "sender announced"
        );
        Ok(view)
    }

    /// Attach a public key. Returns the key id.
    pub fn register_key(&self, participant: &ParticipantId, pem: &str) -> Result<String, PresenceError> {
        let key_id = {
            let mut directory = lock(&self.directory);
            let key_id = directory.register_key(participant, pem)?;
            self.save_keys(&directory);
            let stored_pem = directory.public_key(participant).unwrap_or(pem).to_string();
            self.services.sink.publish(&HubEvent::PubkeyRegistered {
                participant_id: participant.clone(),
                pem: stored_pem,
                key_id: key_id.clone(),
            });
            key_id
        };
        self.stats.increment("keys_registered");
        tracing::info!(participant_id = %participant, key_id = %key_id, "public key registered");
        Ok(key_id)
    }

    /// Connection closed. Returns whether the participant was live.
    pub fn forget(&self, participant: &ParticipantId) -> bool {
        let mut directory = lock(&self.directory);
        let removed = directory.forget(participant).is_some();
        if removed {
            self.services.sink.publish(&HubEvent::ParticipantLeave {
                participant_id: participant.clone(),
            });
            drop(directory);
            tracing::info!(participant_id = %participant, "participant left");
        }
        removed
    }

    /// Clear every registered key.
    pub fn reset_keys(&self) -> Vec<ParticipantId> {
        let cleared = {
            let mut directory = lock(&self.directory);
            let cleared = directory.clear_keys();
            self.save_keys(&directory);
            for id in &cleared {
                self.services.sink.publish(&HubEvent::PubkeyClear {
                    participant_id: id.clone(),
                });
            }
            cleared
        };
        tracing::warn!(count = cleared.len(), "all public keys reset");
        cleared
    }

    pub fn participants(&self) -> Vec<ParticipantView> {
        lock(&self.directory).views()
    }

    /// Everything a newly connected observer needs: the participant list,
    /// every registered key and every meeting roster.
    pub fn observer_snapshot(&self) -> Vec<HubEvent> {
        let mut events = Vec::new();
        {
            let directory = lock(&self.directory);
            events.push(HubEvent::Participants {
                list: directory.views(),
            });
            for (id, pem) in directory.keys() {
                match P256PublicKey::from_pem(pem) {
                    Ok(key) => events.push(HubEvent::PubkeyRegistered {
                        participant_id: id.clone(),
                        pem: pem.clone(),
                        key_id: key.key_id(),
                    }),
                    Err(e) => tracing::warn!(participant_id = %id, error = %e, "stored key does not parse"),
                }
            }
        }
        events.extend(lock(&self.meetings).roster_events());
        events
    }

    // ── Roster binder ────────────────────────────────────────────────────

    /// Apply a full roster snapshot for `meeting_id`.
    pub fn set_meeting_roster(
        &self,
        meeting_id: &MeetingId,
        entries: Vec<RosterInput>,
    ) -> Vec<PresenceView> {
        let candidates = lock(&self.directory).in_meeting(meeting_id);
        let roster = {
            let mut meetings = lock(&self.meetings);
            let update = meetings.set_roster(meeting_id, entries, &candidates, self.now());
            self.save_meetings(&meetings);
            self.publish_all(update.events);
            update.roster
        };
        self.stats.increment("rosters_applied");
        roster
    }

    /// Administrator override of one roster row's binding.
    pub fn bind_attendee(
        &self,
        meeting_id: &MeetingId,
        identity: ExternalIdentity,
        participant: ParticipantId,
    ) {
        {
            let mut meetings = lock(&self.meetings);
            let event = meetings.bind_attendee(meeting_id, identity, participant, self.now());
            self.save_meetings(&meetings);
            self.services.sink.publish(&event);
        }
        tracing::info!(meeting_id = %meeting_id, "attendee bound manually");
    }

    fn resolve_target(&self, request: &VerifyRequest) -> Result<ParticipantId, PresenceError> {
        let resolved = match &request.target {
            VerifyTarget::Participant(id) => Some(id.clone()),
            VerifyTarget::Identity(identity) => {
                let bound = lock(&self.meetings).resolve(&request.meeting_id, identity);
                bound.or_else(|| {
                    lock(&self.directory).find_claiming(identity, &request.meeting_id)
                })
            }
        };
        match resolved {
            Some(id) if lock(&self.directory).get(&id).is_some() => Ok(id),
            _ => Err(PresenceError::UnknownParticipant(request.target.to_string())),
        }
    }

    // ── Challenges ───────────────────────────────────────────────────────

    /// Issue a challenge to the participant `request` resolves to and
    /// deliver it to their connection.
    pub fn request_verification(
        &self,
        request: VerifyRequest,
    ) -> Result<ChallengePayload, PresenceError> {
        let participant = self.resolve_target(&request)?;
        let meeting_id = request.meeting_id.clone();
        let now = self.now();

        let allowed = lock(&self.limiter).try_acquire(&meeting_id, &participant, now);
        if !allowed {
            self.stats.increment("rate_limited");
            tracing::debug!(participant_id = %participant, meeting_id = %meeting_id, "challenge rate limited");
            self.services.sink.publish(&HubEvent::RateLimited {
                participant_id: participant.clone(),
                meeting_id: meeting_id.clone(),
            });
            self.services.sink.deliver(
                &participant,
                &HubEvent::TooManyRequests {
                    meeting_id: meeting_id.clone(),
                },
            );
            return Err(PresenceError::RateLimited {
                meeting: meeting_id,
                participant,
            });
        }

        let random = self.services.random.as_ref();
        let nonce = match request.nonce.filter(|n| !n.is_empty()) {
            Some(nonce) => nonce,
            None => random_hex(random, NONCE_BYTES)?.to_uppercase(),
        };
        let pattern = match request.pattern {
            Some(pattern) => pattern,
            None => {
                let mut byte = [0u8; 1];
                random.fill_bytes(&mut byte)?;
                Pattern::from_random_byte(byte[0])
            }
        };
        let ts = request
            .ts
            .filter(|ts| !ts.is_empty())
            .unwrap_or_else(|| now.as_millis().to_string());

        let challenge = {
            let mut book = lock(&self.challenges);
            let mut issued = None;
            for _ in 0..MAX_ID_ATTEMPTS {
                let id = ChallengeId::new(random_hex(random, CHALLENGE_ID_BYTES)?);
                issued = book.issue(
                    ChallengeRequest {
                        id,
                        participant_id: participant.clone(),
                        meeting_id: meeting_id.clone(),
                        nonce: nonce.clone(),
                        ts: ts.clone(),
                        pattern,
                    },
                    now,
                );
                if issued.is_some() {
                    break;
                }
            }
            issued.ok_or_else(|| CryptoError::Random("challenge id space exhausted".into()))?
        };

        let payload = challenge.payload();
        self.stats.increment("challenges_issued");
        tracing::info!(
            participant_id = %participant,
            meeting_id = %meeting_id,
            challenge_id = %challenge.id,
            "challenge issued"
        );

        let delivered = self.services.sink.deliver(
            &participant,
            &HubEvent::VerifyNow {
                participant_id: participant.clone(),
                payload: payload.clone(),
            },
        );
        if !delivered {
            tracing::warn!(participant_id = %participant, "challenge target has no live connection");
        }
        self.services.sink.publish(&HubEvent::ChallengeIssued {
            participant_id: participant,
            meeting_id,
            challenge_id: challenge.id,
            issued_at: challenge.issued_at,
            ttl_ms: challenge.ttl_ms,
            detect_window_ms: self.params.detect_window_ms,
        });
        Ok(payload)
    }

    pub fn challenge_state(&self, id: &ChallengeId) -> Option<ChallengeState> {
        lock(&self.challenges).state(id, self.now())
    }

    // ── Verifier ─────────────────────────────────────────────────────────

    fn violation(&self, response: &SignedResponse, error: ConsumeError) -> PresenceError {
        self.stats.increment("challenge_violations");
        tracing::warn!(
            participant_id = %response.participant_id,
            challenge_id = ?response.challenge_id,
            reason = error.reason(),
            "challenge violation"
        );
        self.services.sink.publish(&HubEvent::ChallengeViolation {
            participant_id: response.participant_id.clone(),
            reason: error.reason().to_string(),
            meeting_id: Some(response.meeting_id.clone()),
            challenge_id: response.challenge_id.clone(),
            payload: response.submitted(),
        });
        error.into()
    }

    /// Verify a signed response and publish the verdict.
    ///
    /// A challenge that cannot be consumed is a violation: it is published
    /// and returned as an error, and the trust score is left alone. Every
    /// other outcome, trusted or not, is an `Ok` report.
    pub fn submit_response(
        &self,
        response: SignedResponse,
    ) -> Result<VerificationReport, PresenceError> {
        let now = self.now();
        let participant = response.participant_id.clone();

        let consumed = match &response.challenge_id {
            Some(id) => {
                let result = lock(&self.challenges).consume(id, &participant, now);
                match result {
                    Ok(challenge) => Some(challenge),
                    Err(e) => return Err(self.violation(&response, e)),
                }
            }
            None if self.params.require_challenge => {
                return Err(self.violation(&response, ConsumeError::NoSuchChallenge));
            }
            None => None,
        };

        // A consumed challenge is authoritative for everything the hub minted.
        let fields = match &consumed {
            Some(challenge) => CanonicalFields {
                meeting_id: challenge.meeting_id.as_str(),
                participant_id: participant.as_str(),
                challenge_id: challenge.id.as_str(),
                nonce: &challenge.nonce,
                timestamp: &challenge.ts,
                pattern: challenge.pattern,
                quote: response.quote(),
            },
            None => CanonicalFields::from_response(&response),
        };
        let message = canonical_payload(&fields);
        let meeting_id = consumed
            .as_ref()
            .map(|c| c.meeting_id.clone())
            .unwrap_or_else(|| response.meeting_id.clone());

        let report = {
            let mut directory = lock(&self.directory);
            let assessment = {
                let ctx = AssessContext {
                    public_pem: directory.public_key(&participant),
                    baseline: directory.baseline(&participant),
                    drift_policy: self.params.drift_policy,
                    now,
                };
                assess(message.as_bytes(), &response, &ctx)
            };
            if let Some(quote) = &assessment.pin {
                directory.pin_baseline(&participant, quote);
                tracing::info!(participant_id = %participant, "golden baseline pinned");
            }
            let weight = self.params.trust_weight;
            let verdict = assessment.verdict;
            let trust_score =
                directory.record_trust(&participant, |s| update_trust(s, verdict, weight));
            let report = VerificationReport {
                participant_id: participant.clone(),
                meeting_id: Some(meeting_id),
                challenge_id: response.challenge_id.clone(),
                result: assessment.verdict,
                reason: assessment.reason,
                key_id: assessment.key_id,
                drift: assessment.drift,
                trust_score,
                advisory: false,
                at: now,
            };
            self.services
                .sink
                .publish(&HubEvent::VerificationResult(report.clone()));
            report
        };

        match report.result {
            Verdict::Trusted => self.stats.increment("verifications_trusted"),
            Verdict::Untrusted => self.stats.increment("verifications_untrusted"),
        }
        tracing::info!(
            participant_id = %participant,
            result = ?report.result,
            reason = ?report.reason,
            drift = report.drift,
            trust_score = report.trust_score,
            "verification result"
        );
        Ok(report)
    }

    /// A `sidecar` frame that did not carry a usable signed response.
    /// Published as an untrusted `malformed` result; no challenge is
    /// consumed and the trust score is left alone.
    pub fn reject_malformed(
        &self,
        participant: &ParticipantId,
        meeting_id: Option<MeetingId>,
        challenge_id: Option<ChallengeId>,
        detail: &str,
    ) -> VerificationReport {
        let now = self.now();
        self.stats.increment("verifications_untrusted");
        tracing::info!(participant_id = %participant, detail, "malformed signed response");
        let directory = lock(&self.directory);
        let report = VerificationReport {
            participant_id: participant.clone(),
            meeting_id,
            challenge_id,
            result: Verdict::Untrusted,
            reason: VerdictReason::Malformed,
            key_id: None,
            drift: false,
            trust_score: directory.trust_score(participant),
            advisory: false,
            at: now,
        };
        self.services
            .sink
            .publish(&HubEvent::VerificationResult(report.clone()));
        report
    }

    /// The detection window of `id` has elapsed. If the challenge is still
    /// outstanding, publish an advisory `timeout` result; the trust score
    /// is not touched.
    pub fn detection_timeout(&self, id: &ChallengeId) -> Option<VerificationReport> {
        let now = self.now();
        let challenge = {
            let book = lock(&self.challenges);
            let challenge = book.get(id)?;
            if challenge.state(now) != ChallengeState::Issued {
                return None;
            }
            challenge.clone()
        };
        let report = {
            let directory = lock(&self.directory);
            let report = VerificationReport {
                trust_score: directory.trust_score(&challenge.participant_id),
                participant_id: challenge.participant_id,
                meeting_id: Some(challenge.meeting_id),
                challenge_id: Some(challenge.id),
                result: Verdict::Untrusted,
                reason: VerdictReason::Timeout,
                key_id: None,
                drift: false,
                advisory: true,
                at: now,
            };
            self.services
                .sink
                .publish(&HubEvent::VerificationResult(report.clone()));
            report
        };
        self.stats.increment("detection_timeouts");
        tracing::debug!(participant_id = %report.participant_id, "detection window elapsed");
        Some(report)
    }

    // ── Housekeeping ─────────────────────────────────────────────────────

    /// Expire challenges, evict idle meetings and prune full buckets.
    pub fn sweep(&self) -> SweepReport {
        let now = self.now();
        let expired_challenges = lock(&self.challenges).sweep(now);
        let evicted_meetings = {
            let mut meetings = lock(&self.meetings);
            let evicted = meetings.sweep_idle(now, self.params.meeting_idle_ttl_ms);
            if !evicted.is_empty() {
                self.save_meetings(&meetings);
            }
            for id in &evicted {
                self.services.sink.publish(&HubEvent::MeetingRoster {
                    meeting_id: id.clone(),
                    roster: Vec::new(),
                });
            }
            evicted
        };
        let pruned_buckets = lock(&self.limiter).prune(now);

        if !evicted_meetings.is_empty() {
            tracing::info!(count = evicted_meetings.len(), "idle meetings evicted");
        }
        SweepReport {
            expired_challenges,
            evicted_meetings,
            pruned_buckets,
        }
    }

    /// Write keys and rosters to their stores, reporting failures.
    pub fn persist(&self) -> Result<(), PresenceError> {
        {
            let directory = lock(&self.directory);
            self.services.key_store.save_keys(directory.keys())?;
        }
        let meetings = lock(&self.meetings);
        self.services
            .roster_store
            .save_meetings(&meetings.to_stored())?;
        Ok(())
    }
}
