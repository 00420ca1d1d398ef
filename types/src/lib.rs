//! Fundamental types for the Troof presence hub.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! identifiers, external identities, timestamps and clocks, hub parameters, and the
//! events fanned out to observers.

pub mod error;
pub mod event;
pub mod ids;
pub mod identity;
pub mod params;
pub mod pattern;
pub mod time;

pub use error::TypesError;
pub use event::{
    BindingConfidence, ChallengePayload, EventSink, HubEvent, ParticipantView, PresenceView,
    SubmittedPayload, VerificationReport, Verdict, VerdictReason,
};
pub use identity::{ExternalIdentity, IdentityKind};
pub use ids::{ChallengeId, MeetingId, ParticipantId};
pub use params::{DriftPolicy, HubParams};
pub use pattern::Pattern;
pub use time::{Clock, SystemClock, Timestamp};
