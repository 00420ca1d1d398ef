//! Wire messages exchanged with observer and sender connections.
//!
//! Inbound frames are JSON objects discriminated by `type`. Kinds the hub
//! does not know deserialize to [`ClientMessage::Unknown`] and are ignored;
//! a known kind whose fields do not fit is answered with an `error`.
//! Outbound state transitions are serialized
//! [`HubEvent`](troof_types::HubEvent)s; the direct
//! replies below cover the rest.

use serde::{Deserialize, Deserializer, Serialize};

use troof_presence::{
    PresenceError, RosterInput, SenderHello, SignedResponse, VerifyRequest, VerifyTarget,
};
use troof_types::{
    ChallengeId, ExternalIdentity, IdentityKind, MeetingId, ParticipantId, Pattern, Timestamp,
};

/// Connection role declared by the first `role` message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Observer console: receives every published event and may issue
    /// administrative commands.
    Verifier,
    /// A participant's companion app holding the signing key.
    Sender,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct WireIdentity {
    pub kind: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRosterEntry {
    pub identity_key: String,
    #[serde(default)]
    pub display_name: String,
    pub kind: Option<String>,
}

/// Optional fields an observer may pin in a `verify_now`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct WireChallengeHints {
    pub n: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub ts: Option<String>,
    pub pattern: Option<String>,
}

/// The signer's output relayed in a `sidecar` message.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSignedPayload {
    pub meeting_id: String,
    pub challenge_id: Option<String>,
    pub n: String,
    #[serde(deserialize_with = "string_or_number")]
    pub ts: String,
    pub pattern: String,
    pub quote: Option<String>,
    pub sig_hex: String,
    pub alg: Option<String>,
    pub issued_at: Option<u64>,
    pub ttl_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Role {
        role: Role,
        participant_id: Option<String>,
        display_name: Option<String>,
        meeting_id: Option<String>,
        external_identity: Option<WireIdentity>,
        #[serde(rename = "participantUUID")]
        participant_uuid: Option<String>,
        zoom_email: Option<String>,
        enroll_code: Option<String>,
    },
    RegisterPubkey {
        pem: String,
    },
    #[serde(rename_all = "camelCase")]
    SetMeeting {
        meeting_id: String,
        #[serde(default)]
        roster: Vec<WireRosterEntry>,
    },
    #[serde(rename_all = "camelCase")]
    BindAttendee {
        meeting_id: String,
        identity_key: String,
        kind: Option<String>,
        participant_id: String,
    },
    #[serde(rename_all = "camelCase")]
    VerifyNow {
        meeting_id: String,
        by: Option<String>,
        target: String,
        payload: Option<WireChallengeHints>,
    },
    #[serde(rename_all = "camelCase")]
    Sidecar {
        participant_id: String,
        payload: WireSignedPayload,
    },
    ParticipantsRequest,
    ResetKeys,
    Auth {
        token: String,
    },
    Ping,
    #[serde(other)]
    Unknown,
}

/// Direct replies that are not hub events.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Hello {
        role: Option<Role>,
        participant_id: Option<ParticipantId>,
        enrolled: Option<bool>,
        auth_required: bool,
        hub_time: Timestamp,
    },
    EnrollRequired {
        message: String,
    },
    Error {
        message: String,
    },
    Pong,
}

fn malformed(detail: impl std::fmt::Display) -> PresenceError {
    PresenceError::MalformedPayload(detail.to_string())
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.filter(|s| !s.trim().is_empty())
}

/// Parse an identity kind, falling back to the deployment default.
pub fn parse_kind(raw: Option<&str>, default: IdentityKind) -> Result<IdentityKind, PresenceError> {
    match raw.map(str::trim).filter(|k| !k.is_empty()) {
        Some(kind) => IdentityKind::parse(kind).map_err(malformed),
        None => Ok(default),
    }
}

/// Sender announcement from a `role` message.
///
/// Identity hints that fail to parse are dropped; they only help binding.
pub fn sender_hello(
    participant_id: Option<String>,
    display_name: Option<String>,
    meeting_id: Option<String>,
    external_identity: Option<WireIdentity>,
    participant_uuid: Option<String>,
    zoom_email: Option<String>,
    enroll_code: Option<String>,
) -> SenderHello {
    let mut identities = Vec::new();
    let mut push = |kind: IdentityKind, raw: &str| match ExternalIdentity::new(kind, raw) {
        Ok(identity) if !identities.contains(&identity) => identities.push(identity),
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, "ignoring identity hint"),
    };
    if let Some(wire) = external_identity {
        match IdentityKind::parse(&wire.kind) {
            Ok(kind) => push(kind, &wire.value),
            Err(e) => tracing::debug!(error = %e, "ignoring identity hint"),
        }
    }
    if let Some(uuid) = participant_uuid {
        push(IdentityKind::Uuid, &uuid);
    }
    if let Some(email) = zoom_email {
        push(IdentityKind::Email, &email);
    }

    SenderHello {
        participant_id: non_empty(participant_id).map(ParticipantId::new),
        display_name: non_empty(display_name),
        meeting_id: non_empty(meeting_id).map(MeetingId::new),
        identities,
        enroll_code: non_empty(enroll_code),
    }
}

/// Roster rows from a `set_meeting` message. Rows with a blank key or an
/// unknown kind are skipped.
pub fn roster_inputs(rows: Vec<WireRosterEntry>, default: IdentityKind) -> Vec<RosterInput> {
    rows.into_iter()
        .filter_map(|row| {
            let identity = parse_kind(row.kind.as_deref(), default)
                .and_then(|kind| ExternalIdentity::new(kind, &row.identity_key).map_err(malformed));
            match identity {
                Ok(identity) => {
                    let display_name = match row.display_name.trim() {
                        "" => row.identity_key.trim().to_string(),
                        name => name.to_string(),
                    };
                    Some(RosterInput {
                        identity,
                        display_name,
                    })
                }
                Err(e) => {
                    tracing::debug!(error = %e, "skipping roster row");
                    None
                }
            }
        })
        .collect()
}

pub fn verify_request(
    meeting_id: String,
    by: Option<String>,
    target: String,
    hints: Option<WireChallengeHints>,
) -> Result<VerifyRequest, PresenceError> {
    if meeting_id.trim().is_empty() || target.trim().is_empty() {
        return Err(malformed("verify_now needs meetingId and target"));
    }
    let target = match by.as_deref().map(str::trim) {
        None | Some("") | Some("participantId") => VerifyTarget::Participant(ParticipantId::new(target)),
        Some(kind) => {
            let kind = IdentityKind::parse(kind).map_err(malformed)?;
            VerifyTarget::Identity(ExternalIdentity::new(kind, &target).map_err(malformed)?)
        }
    };
    let hints = hints.unwrap_or_default();
    let pattern = match non_empty(hints.pattern) {
        Some(raw) => Some(Pattern::parse(raw.trim()).map_err(malformed)?),
        None => None,
    };
    Ok(VerifyRequest {
        meeting_id: MeetingId::new(meeting_id),
        target,
        nonce: non_empty(hints.n),
        ts: non_empty(hints.ts),
        pattern,
    })
}

pub fn signed_response(
    participant_id: String,
    payload: WireSignedPayload,
) -> Result<SignedResponse, PresenceError> {
    if participant_id.trim().is_empty() {
        return Err(malformed("sidecar without participantId"));
    }
    let pattern = Pattern::parse(payload.pattern.trim()).map_err(malformed)?;
    Ok(SignedResponse {
        participant_id: ParticipantId::new(participant_id),
        meeting_id: MeetingId::new(payload.meeting_id),
        challenge_id: non_empty(payload.challenge_id).map(ChallengeId::new),
        nonce: payload.n,
        timestamp: payload.ts,
        pattern,
        quote: payload.quote,
        signature_hex: payload.sig_hex,
        algorithm: payload.alg,
        issued_at: payload.issued_at.map(Timestamp::new),
        ttl_ms: payload.ttl_ms,
    })
}

/// Accept a JSON string or number as a string (signers send `ts` as
/// either).
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ClientMessage {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn role_message_with_legacy_fields() {
        let msg = parse(
            r#"{"type":"role","role":"sender","participantId":"p1","meetingId":"m1",
                "participantUUID":"U-1","zoomEmail":"Maya@Acme.com","enrollCode":"CISO-2025"}"#,
        );
        let ClientMessage::Role {
            role,
            participant_id,
            display_name,
            meeting_id,
            external_identity,
            participant_uuid,
            zoom_email,
            enroll_code,
        } = msg
        else {
            panic!("expected role");
        };
        assert_eq!(role, Role::Sender);
        let hello = sender_hello(
            participant_id,
            display_name,
            meeting_id,
            external_identity,
            participant_uuid,
            zoom_email,
            enroll_code,
        );
        assert_eq!(hello.participant_id, Some(ParticipantId::new("p1")));
        assert_eq!(hello.enroll_code.as_deref(), Some("CISO-2025"));
        assert_eq!(
            hello.identities,
            vec![
                ExternalIdentity::new(IdentityKind::Uuid, "U-1").unwrap(),
                ExternalIdentity::new(IdentityKind::Email, "maya@acme.com").unwrap(),
            ]
        );
    }

    #[test]
    fn unknown_kinds_are_tolerated() {
        assert_eq!(parse(r#"{"type":"subscribe","topic":"x"}"#), ClientMessage::Unknown);
        assert_eq!(parse(r#"{"type":"ping"}"#), ClientMessage::Ping);
        assert!(serde_json::from_str::<ClientMessage>("{not json").is_err());
    }

    #[test]
    fn roster_rows_use_default_kind() {
        let ClientMessage::SetMeeting { roster, .. } = parse(
            r#"{"type":"set_meeting","meetingId":"m1","roster":[
                {"identityKey":"Maya@Acme.com","displayName":"Maya"},
                {"identityKey":"U-1","displayName":"Sam","kind":"uuid"},
                {"identityKey":"  ","displayName":"blank"},
                {"identityKey":"x","kind":"phone"}]}"#,
        ) else {
            panic!("expected set_meeting");
        };
        let inputs = roster_inputs(roster, IdentityKind::Email);
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].identity.key(), "maya@acme.com");
        assert_eq!(inputs[1].identity.kind(), IdentityKind::Uuid);
    }

    #[test]
    fn verify_now_targets() {
        let by_id = verify_request("m1".into(), None, "p1".into(), None).unwrap();
        assert_eq!(by_id.target, VerifyTarget::Participant(ParticipantId::new("p1")));

        let by_email = verify_request(
            "m1".into(),
            Some("email".into()),
            "Maya@Acme.com".into(),
            Some(WireChallengeHints {
                n: Some("N1".into()),
                ts: Some("5".into()),
                pattern: Some("B".into()),
            }),
        )
        .unwrap();
        assert!(matches!(by_email.target, VerifyTarget::Identity(ExternalIdentity::Email(ref k)) if k == "maya@acme.com"));
        assert_eq!(by_email.pattern, Some(Pattern::B));
        assert_eq!(by_email.nonce.as_deref(), Some("N1"));

        assert!(verify_request("m1".into(), Some("phone".into()), "1".into(), None).is_err());
        assert!(verify_request("m1".into(), None, "p1".into(), Some(WireChallengeHints {
            pattern: Some("C".into()),
            ..WireChallengeHints::default()
        }))
        .is_err());
    }

    #[test]
    fn sidecar_accepts_numeric_ts() {
        let ClientMessage::Sidecar {
            participant_id,
            payload,
        } = parse(
            r#"{"type":"sidecar","participantId":"p1","payload":{"meetingId":"m1",
                "challengeId":"c1","n":"N1","ts":1700000000000,"pattern":"A",
                "sigHex":"3044","alg":"ECDSA-P256-SHA256","issuedAt":5,"ttlMs":30000}}"#,
        ) else {
            panic!("expected sidecar");
        };
        let response = signed_response(participant_id, payload).unwrap();
        assert_eq!(response.timestamp, "1700000000000");
        assert_eq!(response.challenge_id, Some(ChallengeId::new("c1")));
        assert_eq!(response.issued_at, Some(Timestamp::new(5)));
        assert_eq!(response.quote, None);
    }

    #[test]
    fn replies_serialize_with_type_tag() {
        let json = serde_json::to_value(ServerMessage::Hello {
            role: Some(Role::Verifier),
            participant_id: None,
            enrolled: None,
            auth_required: false,
            hub_time: Timestamp::new(1),
        })
        .unwrap();
        assert_eq!(json["type"], "hello");
        assert_eq!(json["role"], "verifier");
        assert_eq!(json["authRequired"], false);
        assert_eq!(serde_json::to_value(ServerMessage::Pong).unwrap()["type"], "pong");
    }
}
