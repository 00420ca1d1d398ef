//! Verifier: canonical payload construction, signature checking, expiry,
//! golden-state drift and the trust score.
//!
//! The canonical payload is the UTF-8 join of
//!
//! ```text
//! meetingId|participantId|challengeId|nonce|timestamp|pattern[|quote]
//! ```
//!
//! The field order is part of the protocol; signers build the same string.

use troof_crypto::{verify_der_hex, P256PublicKey};
use troof_types::{
    ChallengeId, DriftPolicy, MeetingId, ParticipantId, Pattern, SubmittedPayload, Timestamp,
    Verdict, VerdictReason,
};

use crate::PresenceError;

pub const SEPARATOR: char = '|';

/// Algorithm labels accepted on signed responses. An absent label means
/// the default.
const ACCEPTED_ALGORITHMS: [&str; 3] = ["ECDSA-P256-SHA256", "ECDSA-P256", "ES256"];

/// A signed response as submitted by the participant's signer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedResponse {
    pub participant_id: ParticipantId,
    pub meeting_id: MeetingId,
    pub challenge_id: Option<ChallengeId>,
    pub nonce: String,
    pub timestamp: String,
    pub pattern: Pattern,
    pub quote: Option<String>,
    pub signature_hex: String,
    pub algorithm: Option<String>,
    pub issued_at: Option<Timestamp>,
    pub ttl_ms: Option<u64>,
}

impl SignedResponse {
    /// The posture quote, with an empty string treated as absent.
    pub fn quote(&self) -> Option<&str> {
        self.quote.as_deref().filter(|q| !q.is_empty())
    }

    /// The response in its wire shape, for echoing back to observers.
    pub fn submitted(&self) -> SubmittedPayload {
        SubmittedPayload {
            meeting_id: self.meeting_id.clone(),
            challenge_id: self.challenge_id.clone(),
            n: self.nonce.clone(),
            ts: self.timestamp.clone(),
            pattern: self.pattern,
            quote: self.quote.clone(),
            sig_hex: self.signature_hex.clone(),
            alg: self.algorithm.clone(),
            issued_at: self.issued_at,
            ttl_ms: self.ttl_ms,
        }
    }
}

/// The fields covered by the signature.
#[derive(Clone, Copy, Debug)]
pub struct CanonicalFields<'a> {
    pub meeting_id: &'a str,
    pub participant_id: &'a str,
    pub challenge_id: &'a str,
    pub nonce: &'a str,
    pub timestamp: &'a str,
    pub pattern: Pattern,
    pub quote: Option<&'a str>,
}

impl<'a> CanonicalFields<'a> {
    /// Fields as claimed by the response itself.
    pub fn from_response(response: &'a SignedResponse) -> Self {
        Self {
            meeting_id: response.meeting_id.as_str(),
            participant_id: response.participant_id.as_str(),
            challenge_id: response
                .challenge_id
                .as_ref()
                .map(ChallengeId::as_str)
                .unwrap_or(""),
            nonce: &response.nonce,
            timestamp: &response.timestamp,
            pattern: response.pattern,
            quote: response.quote(),
        }
    }
}

/// Build the canonical signed payload.
pub fn canonical_payload(fields: &CanonicalFields<'_>) -> String {
    let mut parts = vec![
        fields.meeting_id,
        fields.participant_id,
        fields.challenge_id,
        fields.nonce,
        fields.timestamp,
        fields.pattern.as_str(),
    ];
    if let Some(quote) = fields.quote.filter(|q| !q.is_empty()) {
        parts.push(quote);
    }
    parts.join(&SEPARATOR.to_string())
}

/// Check a hex DER signature over `message` with a PEM public key.
///
/// `BadSignature` for a well-formed signature that does not verify; a
/// `Crypto` error when key, hex or DER cannot be decoded.
pub fn check_signature(
    message: &[u8],
    signature_hex: &str,
    public_pem: &str,
) -> Result<P256PublicKey, PresenceError> {
    let key = P256PublicKey::from_pem(public_pem)?;
    if verify_der_hex(message, signature_hex, &key)? {
        Ok(key)
    } else {
        Err(PresenceError::BadSignature)
    }
}

fn algorithm_accepted(label: Option<&str>) -> bool {
    match label.map(str::trim) {
        None | Some("") => true,
        Some(label) => ACCEPTED_ALGORITHMS
            .iter()
            .any(|a| a.eq_ignore_ascii_case(label)),
    }
}

/// Verifier decision for one response, before any state is updated.
#[derive(Clone, Debug, PartialEq)]
pub struct Assessment {
    pub verdict: Verdict,
    pub reason: VerdictReason,
    pub key_id: Option<String>,
    pub drift: bool,
    /// Quote to pin as the golden baseline (first successful verification).
    pub pin: Option<String>,
}

impl Assessment {
    fn untrusted(reason: VerdictReason, key_id: Option<String>) -> Self {
        Self {
            verdict: Verdict::Untrusted,
            reason,
            key_id,
            drift: false,
            pin: None,
        }
    }
}

/// Inputs to [`assess`] besides the canonical message.
pub struct AssessContext<'a> {
    pub public_pem: Option<&'a str>,
    pub baseline: Option<&'a str>,
    pub drift_policy: DriftPolicy,
    pub now: Timestamp,
}

/// Decide the verdict for `response` over the canonical `message`.
pub fn assess(message: &[u8], response: &SignedResponse, ctx: &AssessContext<'_>) -> Assessment {
    let Some(public_pem) = ctx.public_pem else {
        return Assessment::untrusted(VerdictReason::NoKey, None);
    };
    if !algorithm_accepted(response.algorithm.as_deref()) {
        return Assessment::untrusted(VerdictReason::Malformed, None);
    }

    let key = match check_signature(message, &response.signature_hex, public_pem) {
        Ok(key) => key,
        Err(PresenceError::BadSignature) => {
            return Assessment::untrusted(VerdictReason::BadSig, key_id_of(public_pem));
        }
        Err(e) => {
            tracing::debug!(participant_id = %response.participant_id, error = %e, "undecodable signature");
            return Assessment::untrusted(VerdictReason::Malformed, key_id_of(public_pem));
        }
    };
    let key_id = Some(key.key_id());

    if let (Some(issued_at), Some(ttl_ms)) = (response.issued_at, response.ttl_ms) {
        if issued_at.has_expired(ttl_ms, ctx.now) {
            return Assessment::untrusted(VerdictReason::Expired, key_id);
        }
    }

    let quote = response.quote();
    match (ctx.baseline, quote) {
        (Some(baseline), Some(quote)) if baseline != quote => {
            let verdict = match ctx.drift_policy {
                DriftPolicy::Flag => Verdict::Trusted,
                DriftPolicy::Reject => Verdict::Untrusted,
            };
            Assessment {
                verdict,
                reason: VerdictReason::StateChanged,
                key_id,
                drift: true,
                pin: None,
            }
        }
        (baseline, quote) => Assessment {
            verdict: Verdict::Trusted,
            reason: VerdictReason::Ok,
            key_id,
            drift: false,
            pin: match (baseline, quote) {
                (None, Some(quote)) => Some(quote.to_string()),
                _ => None,
            },
        },
    }
}

fn key_id_of(public_pem: &str) -> Option<String> {
    P256PublicKey::from_pem(public_pem).ok().map(|k| k.key_id())
}

/// Fold one verdict into the trust EMA: `(1 - w) * score + w * sample`,
/// where the sample is 100 for trusted and 0 otherwise.
pub fn update_trust(score: f64, verdict: Verdict, weight: f64) -> f64 {
    let weight = weight.clamp(0.0, 1.0);
    let sample = match verdict {
        Verdict::Trusted => 100.0,
        Verdict::Untrusted => 0.0,
    };
    ((1.0 - weight) * score + weight * sample).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use troof_nullables::NullSigner;

    fn response(signer: &NullSigner, quote: Option<&str>) -> (String, SignedResponse) {
        let mut response = SignedResponse {
            participant_id: ParticipantId::new("p1"),
            meeting_id: MeetingId::new("m1"),
            challenge_id: Some(ChallengeId::new("c1")),
            nonce: "N1".into(),
            timestamp: "1700000000000".into(),
            pattern: Pattern::A,
            quote: quote.map(String::from),
            signature_hex: String::new(),
            algorithm: Some("ECDSA-P256-SHA256".into()),
            issued_at: None,
            ttl_ms: None,
        };
        let message = canonical_payload(&CanonicalFields::from_response(&response));
        response.signature_hex = signer.sign_hex(&message);
        (message, response)
    }

    fn ctx<'a>(pem: Option<&'a str>, baseline: Option<&'a str>) -> AssessContext<'a> {
        AssessContext {
            public_pem: pem,
            baseline,
            drift_policy: DriftPolicy::Flag,
            now: Timestamp::new(1_000),
        }
    }

    #[test]
    fn canonical_layout() {
        let fields = CanonicalFields {
            meeting_id: "m1",
            participant_id: "p1",
            challenge_id: "c1",
            nonce: "N1",
            timestamp: "5",
            pattern: Pattern::A,
            quote: None,
        };
        assert_eq!(canonical_payload(&fields), "m1|p1|c1|N1|5|A");
        let with_quote = CanonicalFields {
            quote: Some("q"),
            ..fields
        };
        assert_eq!(canonical_payload(&with_quote), "m1|p1|c1|N1|5|A|q");
        let empty_quote = CanonicalFields {
            quote: Some(""),
            ..fields
        };
        assert_eq!(canonical_payload(&empty_quote), "m1|p1|c1|N1|5|A");
    }

    #[test]
    fn valid_signature_is_trusted_and_pins_quote() {
        let signer = NullSigner::generate();
        let pem = signer.public_pem();
        let (message, resp) = response(&signer, Some("golden"));
        let a = assess(message.as_bytes(), &resp, &ctx(Some(&pem), None));
        assert_eq!(a.verdict, Verdict::Trusted);
        assert_eq!(a.reason, VerdictReason::Ok);
        assert_eq!(a.key_id, Some(signer.key_id()));
        assert_eq!(a.pin.as_deref(), Some("golden"));
    }

    #[test]
    fn no_key_and_bad_sig() {
        let signer = NullSigner::generate();
        let (message, resp) = response(&signer, None);
        assert_eq!(
            assess(message.as_bytes(), &resp, &ctx(None, None)).reason,
            VerdictReason::NoKey
        );
        let other = NullSigner::generate().public_pem();
        let a = assess(message.as_bytes(), &resp, &ctx(Some(&other), None));
        assert_eq!(a.verdict, Verdict::Untrusted);
        assert_eq!(a.reason, VerdictReason::BadSig);
    }

    #[test]
    fn garbage_signature_is_malformed() {
        let signer = NullSigner::generate();
        let pem = signer.public_pem();
        let (message, mut resp) = response(&signer, None);
        resp.signature_hex = "not-hex".into();
        assert_eq!(
            assess(message.as_bytes(), &resp, &ctx(Some(&pem), None)).reason,
            VerdictReason::Malformed
        );
        resp.signature_hex = "3006020101020101ff".into();
        assert_eq!(
            assess(message.as_bytes(), &resp, &ctx(Some(&pem), None)).reason,
            VerdictReason::Malformed
        );
    }

    #[test]
    fn unknown_algorithm_is_malformed() {
        let signer = NullSigner::generate();
        let pem = signer.public_pem();
        let (message, mut resp) = response(&signer, None);
        resp.algorithm = Some("RSA-PSS".into());
        assert_eq!(
            assess(message.as_bytes(), &resp, &ctx(Some(&pem), None)).reason,
            VerdictReason::Malformed
        );
        resp.algorithm = None;
        assert_eq!(
            assess(message.as_bytes(), &resp, &ctx(Some(&pem), None)).reason,
            VerdictReason::Ok
        );
    }

    #[test]
    fn elapsed_response_window_is_expired() {
        let signer = NullSigner::generate();
        let pem = signer.public_pem();
        let (message, mut resp) = response(&signer, None);
        resp.issued_at = Some(Timestamp::new(0));
        resp.ttl_ms = Some(999);
        let a = assess(message.as_bytes(), &resp, &ctx(Some(&pem), None));
        assert_eq!((a.verdict, a.reason), (Verdict::Untrusted, VerdictReason::Expired));

        resp.ttl_ms = Some(1_000);
        let a = assess(message.as_bytes(), &resp, &ctx(Some(&pem), None));
        assert_eq!(a.verdict, Verdict::Trusted);
    }

    #[test]
    fn drift_follows_policy() {
        let signer = NullSigner::generate();
        let pem = signer.public_pem();
        let (message, resp) = response(&signer, Some("changed"));

        let flagged = assess(message.as_bytes(), &resp, &ctx(Some(&pem), Some("golden")));
        assert_eq!(flagged.verdict, Verdict::Trusted);
        assert_eq!(flagged.reason, VerdictReason::StateChanged);
        assert!(flagged.drift);
        assert!(flagged.pin.is_none());

        let mut strict = ctx(Some(&pem), Some("golden"));
        strict.drift_policy = DriftPolicy::Reject;
        let rejected = assess(message.as_bytes(), &resp, &strict);
        assert_eq!(rejected.verdict, Verdict::Untrusted);
        assert!(rejected.drift);

        let same = assess(message.as_bytes(), &resp, &ctx(Some(&pem), Some("changed")));
        assert_eq!(same.reason, VerdictReason::Ok);
        assert!(!same.drift);
    }

    #[test]
    fn trust_ema() {
        let up = update_trust(60.0, Verdict::Trusted, 0.12);
        assert!((up - 64.8).abs() < 1e-9);
        let down = update_trust(60.0, Verdict::Untrusted, 0.12);
        assert!((down - 52.8).abs() < 1e-9);
        assert_eq!(update_trust(100.0, Verdict::Trusted, 0.12), 100.0);
        assert_eq!(update_trust(0.0, Verdict::Untrusted, 5.0), 0.0);
    }
}
