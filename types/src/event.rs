//! Hub events and the fan-out seam.
//!
//! Every state transition of the presence core is described by a
//! [`HubEvent`]. The core never talks to sockets; it hands events to an
//! [`EventSink`], which relays them to observer connections (`publish`) or
//! to one participant's own connection (`deliver`).
//!
//! The serialized form of a `HubEvent` is the outbound wire message: a JSON
//! object discriminated by `type` with camelCase fields.

use serde::{Deserialize, Serialize};

use crate::{ChallengeId, IdentityKind, MeetingId, ParticipantId, Pattern, Timestamp};

/// How a presence entry came to be bound to a participant.
///
/// Ordered by confidence: a binding may only be replaced by one that
/// compares greater or equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BindingConfidence {
    DisplayName,
    Email,
    Uuid,
    /// Administrator override; never replaced by heuristics.
    Manual,
}

impl From<IdentityKind> for BindingConfidence {
    fn from(kind: IdentityKind) -> Self {
        match kind {
            IdentityKind::Uuid => Self::Uuid,
            IdentityKind::Email => Self::Email,
            IdentityKind::DisplayName => Self::DisplayName,
        }
    }
}

/// Observer-facing copy of a participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: ParticipantId,
    pub display_name: String,
    pub enrolled: bool,
    pub has_key: bool,
    pub trust_score: f64,
    pub meeting_id: Option<MeetingId>,
}

/// Observer-facing copy of one roster row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceView {
    pub identity_key: String,
    pub kind: IdentityKind,
    pub display_name: String,
    pub participant_id: Option<ParticipantId>,
    pub confidence: Option<BindingConfidence>,
}

/// The challenge as handed to the participant's signer.
///
/// The signer signs the canonical join of these fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengePayload {
    pub meeting_id: MeetingId,
    pub participant_id: ParticipantId,
    pub challenge_id: ChallengeId,
    pub n: String,
    pub ts: String,
    pub issued_at: Timestamp,
    pub ttl_ms: u64,
    pub pattern: Pattern,
}

/// A signed response as the participant submitted it, echoed back to
/// observers when it is rejected before verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedPayload {
    pub meeting_id: MeetingId,
    pub challenge_id: Option<ChallengeId>,
    pub n: String,
    pub ts: String,
    pub pattern: Pattern,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    pub sig_hex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Trusted,
    Untrusted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    Ok,
    StateChanged,
    BadSig,
    Malformed,
    Expired,
    NoKey,
    Timeout,
}

/// Outcome of one verification attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub participant_id: ParticipantId,
    pub meeting_id: Option<MeetingId>,
    pub challenge_id: Option<ChallengeId>,
    pub result: Verdict,
    pub reason: VerdictReason,
    pub key_id: Option<String>,
    pub drift: bool,
    pub trust_score: f64,
    /// Set for observer-side timeouts that do not reflect a Verifier decision.
    pub advisory: bool,
    pub at: Timestamp,
}

/// A state transition of the hub, in its outbound wire shape.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    ParticipantJoin {
        info: ParticipantView,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantLeave {
        participant_id: ParticipantId,
    },
    Participants {
        list: Vec<ParticipantView>,
    },
    #[serde(rename = "pubkey_pem", rename_all = "camelCase")]
    PubkeyRegistered {
        participant_id: ParticipantId,
        pem: String,
        key_id: String,
    },
    #[serde(rename_all = "camelCase")]
    PubkeyClear {
        participant_id: ParticipantId,
    },
    #[serde(rename_all = "camelCase")]
    MeetingRoster {
        meeting_id: MeetingId,
        roster: Vec<PresenceView>,
    },
    #[serde(rename_all = "camelCase")]
    MeetingPresence {
        meeting_id: MeetingId,
        identity_key: String,
        kind: IdentityKind,
        participant_id: ParticipantId,
        confidence: BindingConfidence,
    },
    #[serde(rename_all = "camelCase")]
    ChallengeIssued {
        participant_id: ParticipantId,
        meeting_id: MeetingId,
        challenge_id: ChallengeId,
        issued_at: Timestamp,
        ttl_ms: u64,
        detect_window_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    VerifyNow {
        participant_id: ParticipantId,
        payload: ChallengePayload,
    },
    #[serde(rename_all = "camelCase")]
    RateLimited {
        participant_id: ParticipantId,
        meeting_id: MeetingId,
    },
    #[serde(rename_all = "camelCase")]
    TooManyRequests {
        meeting_id: MeetingId,
    },
    #[serde(rename_all = "camelCase")]
    ChallengeViolation {
        participant_id: ParticipantId,
        reason: String,
        meeting_id: Option<MeetingId>,
        challenge_id: Option<ChallengeId>,
        payload: SubmittedPayload,
    },
    VerificationResult(VerificationReport),
}

impl HubEvent {
    /// The wire `type` of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ParticipantJoin { .. } => "participant_join",
            Self::ParticipantLeave { .. } => "participant_leave",
            Self::Participants { .. } => "participants",
            Self::PubkeyRegistered { .. } => "pubkey_pem",
            Self::PubkeyClear { .. } => "pubkey_clear",
            Self::MeetingRoster { .. } => "meeting_roster",
            Self::MeetingPresence { .. } => "meeting_presence",
            Self::ChallengeIssued { .. } => "challenge_issued",
            Self::VerifyNow { .. } => "verify_now",
            Self::RateLimited { .. } => "rate_limited",
            Self::TooManyRequests { .. } => "too_many_requests",
            Self::ChallengeViolation { .. } => "challenge_violation",
            Self::VerificationResult(_) => "verification_result",
        }
    }
}

/// Relay for hub events. Sends are fire-and-forget.
pub trait EventSink: Send + Sync {
    /// Send to every observer connection.
    fn publish(&self, event: &HubEvent);

    /// Send to one participant's connection. Returns `false` if it has no
    /// live connection.
    fn deliver(&self, participant: &ParticipantId, event: &HubEvent) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag_and_camel_case() {
        let event = HubEvent::RateLimited {
            participant_id: ParticipantId::new("p1"),
            meeting_id: MeetingId::new("m1"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "rate_limited");
        assert_eq!(json["participantId"], "p1");
        assert_eq!(json["meetingId"], "m1");
    }

    #[test]
    fn pubkey_event_uses_wire_name() {
        let event = HubEvent::PubkeyRegistered {
            participant_id: ParticipantId::new("p1"),
            pem: "PEM".into(),
            key_id: "abc".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind());
        assert_eq!(json["keyId"], "abc");
    }

    #[test]
    fn verification_result_is_flattened() {
        let event = HubEvent::VerificationResult(VerificationReport {
            participant_id: ParticipantId::new("p1"),
            meeting_id: Some(MeetingId::new("m1")),
            challenge_id: None,
            result: Verdict::Trusted,
            reason: VerdictReason::Ok,
            key_id: None,
            drift: false,
            trust_score: 64.8,
            advisory: false,
            at: Timestamp::new(5),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "verification_result");
        assert_eq!(json["result"], "trusted");
        assert_eq!(json["reason"], "ok");
        assert_eq!(json["participantId"], "p1");
    }

    #[test]
    fn violation_echoes_submitted_payload() {
        let event = HubEvent::ChallengeViolation {
            participant_id: ParticipantId::new("p1"),
            reason: "replayed".into(),
            meeting_id: Some(MeetingId::new("m1")),
            challenge_id: Some(ChallengeId::new("c1")),
            payload: SubmittedPayload {
                meeting_id: MeetingId::new("m1"),
                challenge_id: Some(ChallengeId::new("c1")),
                n: "N1".into(),
                ts: "1700000000000".into(),
                pattern: Pattern::B,
                quote: None,
                sig_hex: "3045".into(),
                alg: Some("ECDSA-P256-SHA256".into()),
                issued_at: None,
                ttl_ms: None,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "challenge_violation");
        assert_eq!(json["payload"]["challengeId"], "c1");
        assert_eq!(json["payload"]["sigHex"], "3045");
        assert_eq!(json["payload"]["n"], "N1");
        assert!(json["payload"].get("quote").is_none());
    }

    #[test]
    fn confidence_ordering() {
        assert!(BindingConfidence::Manual > BindingConfidence::Uuid);
        assert!(BindingConfidence::Uuid > BindingConfidence::Email);
        assert!(BindingConfidence::Email > BindingConfidence::DisplayName);
    }
}
