use thiserror::Error;

use troof_crypto::CryptoError;
use troof_store::StoreError;
use troof_types::{MeetingId, ParticipantId};

/// Why a challenge could not be consumed.
///
/// Checked in declaration order; the first failing check is reported.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ConsumeError {
    #[error("no such challenge")]
    NoSuchChallenge,

    #[error("challenge already used")]
    AlreadyUsed,

    #[error("challenge expired")]
    Expired,

    #[error("challenge was issued to another participant")]
    WrongParticipant,
}

impl ConsumeError {
    /// Reason code carried by `challenge_violation` events.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoSuchChallenge => "no_such_challenge",
            Self::AlreadyUsed => "already_used",
            Self::Expired => "expired",
            Self::WrongParticipant => "wrong_participant",
        }
    }
}

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("participant {0} is not enrolled")]
    EnrollmentRequired(ParticipantId),

    #[error("no route to verification target {0}")]
    UnknownParticipant(String),

    #[error("rate limited: {participant} in meeting {meeting}")]
    RateLimited {
        meeting: MeetingId,
        participant: ParticipantId,
    },

    #[error("challenge rejected: {0}")]
    Challenge(#[from] ConsumeError),

    #[error("signature does not verify")]
    BadSignature,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
