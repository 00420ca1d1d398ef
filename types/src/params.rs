//! Hub parameters: the timing and policy knobs of the presence core.

use serde::{Deserialize, Serialize};

/// What a posture-quote mismatch does to an otherwise valid signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftPolicy {
    /// Keep the verdict trusted and flag `state_changed`.
    #[default]
    Flag,
    /// Downgrade the verdict to untrusted.
    Reject,
}

/// All tunables of the presence-verification core.
///
/// Every field has a protocol default; a `[params]` table in the hub
/// configuration may override any subset of them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubParams {
    // ── Challenges ───────────────────────────────────────────────────────
    /// Issuance-to-submission window (milliseconds).
    pub challenge_ttl_ms: u64,

    /// Extra time a challenge record is retained after its TTL so that late
    /// replays still report `already_used`/`expired` rather than
    /// `no_such_challenge`.
    pub challenge_grace_ms: u64,

    /// Advisory detection window published to observers (milliseconds).
    /// Not enforced by the issuer.
    pub detect_window_ms: u64,

    /// Reject signed responses that carry no challenge id.
    pub require_challenge: bool,

    // ── Rate limiting ────────────────────────────────────────────────────
    /// Tokens per (meeting, participant) bucket.
    pub bucket_capacity: u32,

    /// Milliseconds per refilled token.
    pub bucket_refill_ms: u64,

    // ── Roster ───────────────────────────────────────────────────────────
    /// Meetings without a roster update for this long are evicted.
    pub meeting_idle_ttl_ms: u64,

    /// Period of the background expiry sweep.
    pub sweep_interval_ms: u64,

    // ── Trust ────────────────────────────────────────────────────────────
    /// Trust score assigned to a newly announced participant.
    pub trust_initial: f64,

    /// Weight of the newest observation in the trust EMA.
    pub trust_weight: f64,

    /// Reaction to golden-state drift.
    pub drift_policy: DriftPolicy,
}

impl Default for HubParams {
    fn default() -> Self {
        Self {
            challenge_ttl_ms: 30_000,
            challenge_grace_ms: 5_000,
            detect_window_ms: 1_400,
            require_challenge: false,

            bucket_capacity: 3,
            bucket_refill_ms: 5_000,

            meeting_idle_ttl_ms: 60 * 60 * 1_000, // 1 hour
            sweep_interval_ms: 5_000,

            trust_initial: 60.0,
            trust_weight: 0.12,
            drift_policy: DriftPolicy::Flag,
        }
    }
}
