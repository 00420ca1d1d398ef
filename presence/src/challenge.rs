//! Challenge issuer: single-use, time-bound challenges.
//!
//! ```text
//! ISSUED ──consume──▶ CONSUMED
//!    │
//!    └──ttl elapses──▶ EXPIRED
//! ```
//!
//! Both outcomes are terminal. Records are kept for `ttl + grace` so that
//! late replays are still reported as `already_used` or `expired`.

use std::collections::HashMap;

use troof_types::{ChallengeId, ChallengePayload, MeetingId, ParticipantId, Pattern, Timestamp};

use crate::ConsumeError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeState {
    Issued,
    Consumed,
    Expired,
}

/// An issued challenge together with the fields the signer must sign.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    pub id: ChallengeId,
    pub participant_id: ParticipantId,
    pub meeting_id: MeetingId,
    pub issued_at: Timestamp,
    pub ttl_ms: u64,
    pub consumed: bool,
    pub nonce: String,
    pub ts: String,
    pub pattern: Pattern,
}

impl Challenge {
    pub fn state(&self, now: Timestamp) -> ChallengeState {
        if self.consumed {
            ChallengeState::Consumed
        } else if self.issued_at.has_expired(self.ttl_ms, now) {
            ChallengeState::Expired
        } else {
            ChallengeState::Issued
        }
    }

    pub fn payload(&self) -> ChallengePayload {
        ChallengePayload {
            meeting_id: self.meeting_id.clone(),
            participant_id: self.participant_id.clone(),
            challenge_id: self.id.clone(),
            n: self.nonce.clone(),
            ts: self.ts.clone(),
            issued_at: self.issued_at,
            ttl_ms: self.ttl_ms,
            pattern: self.pattern,
        }
    }
}

/// Parameters of a new challenge, chosen by the caller.
#[derive(Clone, Debug)]
pub struct ChallengeRequest {
    pub id: ChallengeId,
    pub participant_id: ParticipantId,
    pub meeting_id: MeetingId,
    pub nonce: String,
    pub ts: String,
    pub pattern: Pattern,
}

pub struct ChallengeBook {
    challenges: HashMap<ChallengeId, Challenge>,
    ttl_ms: u64,
    grace_ms: u64,
}

impl ChallengeBook {
    pub fn new(ttl_ms: u64, grace_ms: u64) -> Self {
        Self {
            challenges: HashMap::new(),
            ttl_ms,
            grace_ms,
        }
    }

    pub fn contains(&self, id: &ChallengeId) -> bool {
        self.challenges.contains_key(id)
    }

    /// Record a new challenge. An existing record under the same id is
    /// never replaced; callers draw ids until [`contains`](Self::contains)
    /// is false.
    pub fn issue(&mut self, request: ChallengeRequest, now: Timestamp) -> Option<Challenge> {
        if self.contains(&request.id) {
            return None;
        }
        let challenge = Challenge {
            id: request.id,
            participant_id: request.participant_id,
            meeting_id: request.meeting_id,
            issued_at: now,
            ttl_ms: self.ttl_ms,
            consumed: false,
            nonce: request.nonce,
            ts: request.ts,
            pattern: request.pattern,
        };
        self.challenges.insert(challenge.id.clone(), challenge.clone());
        Some(challenge)
    }

    /// Consume a challenge on behalf of `participant`.
    ///
    /// Checks run in the order of [`ConsumeError`]'s variants and a failure
    /// leaves the record untouched.
    pub fn consume(
        &mut self,
        id: &ChallengeId,
        participant: &ParticipantId,
        now: Timestamp,
    ) -> Result<Challenge, ConsumeError> {
        let challenge = self
            .challenges
            .get_mut(id)
            .ok_or(ConsumeError::NoSuchChallenge)?;
        if challenge.consumed {
            return Err(ConsumeError::AlreadyUsed);
        }
        if challenge.issued_at.has_expired(challenge.ttl_ms, now) {
            return Err(ConsumeError::Expired);
        }
        if &challenge.participant_id != participant {
            return Err(ConsumeError::WrongParticipant);
        }
        challenge.consumed = true;
        Ok(challenge.clone())
    }

    pub fn state(&self, id: &ChallengeId, now: Timestamp) -> Option<ChallengeState> {
        self.challenges.get(id).map(|c| c.state(now))
    }

    pub fn get(&self, id: &ChallengeId) -> Option<&Challenge> {
        self.challenges.get(id)
    }

    /// Drop records past `ttl + grace`, consumed or not.
    pub fn sweep(&mut self, now: Timestamp) -> Vec<ChallengeId> {
        let retention = self.ttl_ms.saturating_add(self.grace_ms);
        let mut removed = Vec::new();
        self.challenges.retain(|id, c| {
            let keep = !c.issued_at.has_expired(retention, now);
            if !keep {
                removed.push(id.clone());
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }
}
