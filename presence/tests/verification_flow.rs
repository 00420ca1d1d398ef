//! End-to-end challenge/response flows through `PresenceHub`.

use std::sync::Arc;

use troof_nullables::{NullClock, NullEventSink, NullRandom, NullSigner, NullStore};
use troof_presence::{
    canonical_payload, CanonicalFields, ConsumeError, EnrollmentCode, HubServices, PresenceError,
    PresenceHub, SenderHello, SignedResponse, StaticEnrollment, VerifyRequest, VerifyTarget,
};
use troof_types::{
    ChallengePayload, DriftPolicy, HubEvent, HubParams, MeetingId, ParticipantId, Pattern,
    Verdict, VerdictReason,
};

struct Fixture {
    hub: Arc<PresenceHub>,
    clock: Arc<NullClock>,
    sink: Arc<NullEventSink>,
    signer: NullSigner,
}

fn code(code: &str, id: &str) -> EnrollmentCode {
    EnrollmentCode {
        code: code.into(),
        participant_id: id.into(),
        display_name: id.to_uppercase(),
    }
}

fn fixture_with(params: HubParams) -> Fixture {
    troof_utils::init_tracing();
    let clock = Arc::new(NullClock::new(1_700_000_000_000));
    let sink = Arc::new(NullEventSink::new());
    let store = Arc::new(NullStore::new());
    let hub = PresenceHub::new(
        params,
        HubServices {
            clock: clock.clone(),
            random: Arc::new(NullRandom::new()),
            sink: sink.clone(),
            key_store: store.clone(),
            roster_store: store,
            enrollment: Arc::new(StaticEnrollment::new(vec![
                code("P1-CODE", "p1"),
                code("P2-CODE", "p2"),
            ])),
        },
    )
    .unwrap();

    let signer = NullSigner::generate();
    for enroll in ["P1-CODE", "P2-CODE"] {
        hub.announce(SenderHello {
            meeting_id: Some(MeetingId::new("m1")),
            enroll_code: Some(enroll.into()),
            ..SenderHello::default()
        })
        .unwrap();
    }
    hub.register_key(&ParticipantId::new("p1"), &signer.public_pem())
        .unwrap();
    sink.reset();

    Fixture {
        hub: Arc::new(hub),
        clock,
        sink,
        signer,
    }
}

fn fixture() -> Fixture {
    fixture_with(HubParams::default())
}

fn challenge_p1(f: &Fixture) -> ChallengePayload {
    f.hub
        .request_verification(VerifyRequest {
            meeting_id: MeetingId::new("m1"),
            target: VerifyTarget::Participant(ParticipantId::new("p1")),
            nonce: Some("N1".into()),
            ts: None,
            pattern: Some(Pattern::A),
        })
        .unwrap()
}

/// What the participant's signer sends back for `payload`.
fn signed(f: &Fixture, payload: &ChallengePayload, quote: Option<&str>) -> SignedResponse {
    let mut response = SignedResponse {
        participant_id: payload.participant_id.clone(),
        meeting_id: payload.meeting_id.clone(),
        challenge_id: Some(payload.challenge_id.clone()),
        nonce: payload.n.clone(),
        timestamp: payload.ts.clone(),
        pattern: payload.pattern,
        quote: quote.map(String::from),
        signature_hex: String::new(),
        algorithm: Some("ECDSA-P256-SHA256".into()),
        issued_at: Some(payload.issued_at),
        ttl_ms: Some(payload.ttl_ms),
    };
    let message = canonical_payload(&CanonicalFields::from_response(&response));
    response.signature_hex = f.signer.sign_hex(&message);
    response
}

fn last_violation_reason(sink: &NullEventSink) -> Option<String> {
    sink.published().into_iter().rev().find_map(|e| match e {
        HubEvent::ChallengeViolation { reason, .. } => Some(reason),
        _ => None,
    })
}

#[test]
fn trusted_then_replay_is_a_violation() {
    let f = fixture();
    let payload = challenge_p1(&f);
    assert_eq!(
        canonical_payload(&CanonicalFields::from_response(&signed(&f, &payload, None))),
        format!("m1|p1|{}|N1|{}|A", payload.challenge_id, payload.ts)
    );

    let response = signed(&f, &payload, None);
    let report = f.hub.submit_response(response.clone()).unwrap();
    assert_eq!(report.result, Verdict::Trusted);
    assert_eq!(report.reason, VerdictReason::Ok);
    assert_eq!(report.key_id, Some(f.signer.key_id()));
    assert!((report.trust_score - 64.8).abs() < 1e-9);
    assert_eq!(f.sink.published_kinds().last(), Some(&"verification_result"));

    let err = f.hub.submit_response(response).unwrap_err();
    assert!(matches!(
        err,
        PresenceError::Challenge(ConsumeError::AlreadyUsed)
    ));
    assert_eq!(last_violation_reason(&f.sink).as_deref(), Some("already_used"));
    assert_eq!(f.hub.participants()[0].trust_score, report.trust_score);
}

#[test]
fn concurrent_submissions_consume_once() {
    let f = fixture();
    let payload = challenge_p1(&f);
    let response = signed(&f, &payload, None);

    let outcomes: Vec<bool> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let hub = f.hub.clone();
                let response = response.clone();
                scope.spawn(move || hub.submit_response(response).is_ok())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let violations = f
        .sink
        .published_kinds()
        .into_iter()
        .filter(|k| *k == "challenge_violation")
        .count();
    assert_eq!(violations, 7);
}

#[test]
fn expiry_boundary_through_the_hub() {
    let f = fixture();
    let payload = challenge_p1(&f);
    f.clock.advance(payload.ttl_ms - 1);
    let report = f.hub.submit_response(signed(&f, &payload, None)).unwrap();
    assert_eq!(report.result, Verdict::Trusted);

    let payload = challenge_p1(&f);
    f.clock.advance(payload.ttl_ms + 1);
    let err = f.hub.submit_response(signed(&f, &payload, None)).unwrap_err();
    assert!(matches!(err, PresenceError::Challenge(ConsumeError::Expired)));
    assert_eq!(last_violation_reason(&f.sink).as_deref(), Some("expired"));
}

#[test]
fn wrong_participant_leaves_challenge_usable() {
    let f = fixture();
    let payload = challenge_p1(&f);
    let mut stolen = signed(&f, &payload, None);
    stolen.participant_id = ParticipantId::new("p2");
    let err = f.hub.submit_response(stolen).unwrap_err();
    assert!(matches!(
        err,
        PresenceError::Challenge(ConsumeError::WrongParticipant)
    ));

    let report = f.hub.submit_response(signed(&f, &payload, None)).unwrap();
    assert_eq!(report.result, Verdict::Trusted);
}

#[test]
fn unknown_challenge_is_a_violation() {
    let f = fixture();
    let payload = challenge_p1(&f);
    let mut response = signed(&f, &payload, None);
    response.challenge_id = Some("deadbeef".into());
    assert!(matches!(
        f.hub.submit_response(response),
        Err(PresenceError::Challenge(ConsumeError::NoSuchChallenge))
    ));
    assert_eq!(
        last_violation_reason(&f.sink).as_deref(),
        Some("no_such_challenge")
    );
}

#[test]
fn violation_echoes_the_submitted_response() {
    let f = fixture();
    let payload = challenge_p1(&f);
    let response = signed(&f, &payload, None);
    f.hub.submit_response(response.clone()).unwrap();
    f.hub.submit_response(response.clone()).unwrap_err();

    let echoed = f.sink.published().into_iter().rev().find_map(|e| match e {
        HubEvent::ChallengeViolation { payload, .. } => Some(payload),
        _ => None,
    });
    let echoed = echoed.expect("violation published");
    assert_eq!(echoed, response.submitted());
    assert_eq!(echoed.challenge_id, Some(payload.challenge_id));
    assert_eq!(echoed.n, "N1");
    assert_eq!(echoed.sig_hex, response.signature_hex);
}

#[test]
fn malformed_sidecar_is_untrusted_without_touching_state() {
    let f = fixture();
    let payload = challenge_p1(&f);
    let p1 = ParticipantId::new("p1");
    let before = f.hub.participants();

    let report = f.hub.reject_malformed(
        &p1,
        Some(MeetingId::new("m1")),
        Some(payload.challenge_id.clone()),
        "missing field `sigHex`",
    );
    assert_eq!(report.result, Verdict::Untrusted);
    assert_eq!(report.reason, VerdictReason::Malformed);
    assert!(!report.advisory);
    assert_eq!(f.hub.participants(), before);
    assert_eq!(f.hub.stats().get("verifications_untrusted"), 1);
    match f.sink.published().last() {
        Some(HubEvent::VerificationResult(published)) => assert_eq!(published, &report),
        other => panic!("expected a verification result, got {other:?}"),
    }

    // The challenge is still outstanding.
    let report = f.hub.submit_response(signed(&f, &payload, None)).unwrap();
    assert_eq!(report.result, Verdict::Trusted);
}

#[test]
fn server_fields_are_authoritative() {
    let f = fixture();
    let payload = challenge_p1(&f);
    let mut response = signed(&f, &payload, None);
    // Claimed fields are ignored once the challenge is consumed; the
    // signature covers what the hub issued.
    response.nonce = "FORGED".into();
    response.pattern = Pattern::B;
    let report = f.hub.submit_response(response).unwrap();
    assert_eq!(report.result, Verdict::Trusted);

    // Signing anything other than the issued fields fails.
    let payload = challenge_p1(&f);
    let mut forged = payload.clone();
    forged.n = "OTHER".into();
    let mut response = signed(&f, &forged, None);
    response.nonce = payload.n.clone();
    let report = f.hub.submit_response(response).unwrap();
    assert_eq!(report.result, Verdict::Untrusted);
    assert_eq!(report.reason, VerdictReason::BadSig);
    assert!(report.trust_score < 64.8);
}

#[test]
fn tampered_fields_break_unchallenged_responses() {
    let f = fixture();
    let payload = challenge_p1(&f);
    let mut base = signed(&f, &payload, Some("quote"));
    base.challenge_id = None;
    let message = canonical_payload(&CanonicalFields::from_response(&base));
    base.signature_hex = f.signer.sign_hex(&message);
    assert_eq!(
        f.hub.submit_response(base.clone()).unwrap().result,
        Verdict::Trusted
    );

    let tampers: Vec<Box<dyn Fn(&mut SignedResponse)>> = vec![
        Box::new(|r| r.meeting_id = MeetingId::new("m2")),
        Box::new(|r| r.nonce.push('X')),
        Box::new(|r| r.timestamp.push('0')),
        Box::new(|r| r.pattern = Pattern::B),
        Box::new(|r| r.quote = None),
    ];
    for tamper in tampers {
        let mut response = base.clone();
        tamper(&mut response);
        let report = f.hub.submit_response(response).unwrap();
        assert_eq!(report.reason, VerdictReason::BadSig);
    }
}

#[test]
fn golden_state_drift_is_flagged() {
    let f = fixture();
    let first = challenge_p1(&f);
    let report = f.hub.submit_response(signed(&f, &first, Some("golden"))).unwrap();
    assert_eq!(report.reason, VerdictReason::Ok);

    let second = challenge_p1(&f);
    let report = f.hub.submit_response(signed(&f, &second, Some("changed"))).unwrap();
    assert_eq!(report.result, Verdict::Trusted);
    assert_eq!(report.reason, VerdictReason::StateChanged);
    assert!(report.drift);

    let third = challenge_p1(&f);
    let report = f.hub.submit_response(signed(&f, &third, Some("golden"))).unwrap();
    assert_eq!(report.reason, VerdictReason::Ok);
}

#[test]
fn reject_policy_downgrades_drift() {
    let f = fixture_with(HubParams {
        drift_policy: DriftPolicy::Reject,
        ..HubParams::default()
    });
    let first = challenge_p1(&f);
    f.hub.submit_response(signed(&f, &first, Some("golden"))).unwrap();
    let second = challenge_p1(&f);
    let report = f.hub.submit_response(signed(&f, &second, Some("changed"))).unwrap();
    assert_eq!(report.result, Verdict::Untrusted);
    assert!(report.drift);
}

#[test]
fn missing_key_is_untrusted() {
    let f = fixture();
    let payload = f
        .hub
        .request_verification(VerifyRequest {
            meeting_id: MeetingId::new("m1"),
            target: VerifyTarget::Participant(ParticipantId::new("p2")),
            nonce: None,
            ts: None,
            pattern: None,
        })
        .unwrap();
    let report = f.hub.submit_response(signed(&f, &payload, None)).unwrap();
    assert_eq!(report.result, Verdict::Untrusted);
    assert_eq!(report.reason, VerdictReason::NoKey);
}

#[test]
fn required_challenge_rejects_bare_responses() {
    let f = fixture_with(HubParams {
        require_challenge: true,
        ..HubParams::default()
    });
    let payload = challenge_p1(&f);
    let mut response = signed(&f, &payload, None);
    response.challenge_id = None;
    assert!(matches!(
        f.hub.submit_response(response),
        Err(PresenceError::Challenge(ConsumeError::NoSuchChallenge))
    ));
}

#[test]
fn rate_limit_recovers_after_one_interval() {
    let f = fixture_with(HubParams {
        bucket_refill_ms: 2_500,
        ..HubParams::default()
    });
    for _ in 0..3 {
        challenge_p1(&f);
    }
    let denied = f.hub.request_verification(VerifyRequest {
        meeting_id: MeetingId::new("m1"),
        target: VerifyTarget::Participant(ParticipantId::new("p1")),
        nonce: None,
        ts: None,
        pattern: None,
    });
    assert!(matches!(denied, Err(PresenceError::RateLimited { .. })));

    f.clock.advance(2_500);
    challenge_p1(&f);
    let again = f.hub.request_verification(VerifyRequest {
        meeting_id: MeetingId::new("m1"),
        target: VerifyTarget::Participant(ParticipantId::new("p1")),
        nonce: None,
        ts: None,
        pattern: None,
    });
    assert!(again.is_err());
}
