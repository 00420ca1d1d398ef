//! Presence-verification core of the Troof hub.
//!
//! - [`directory`]: live participants, registered keys, golden baselines
//! - [`roster`]: per-meeting presence entries and their bindings
//! - [`challenge`]: single-use, time-bound challenges
//! - [`limiter`]: per-(meeting, participant) token buckets
//! - [`verifier`]: canonical payload, signature check, drift, trust score
//! - [`enrollment`]: enrollment code resolution
//!
//! [`PresenceHub`] ties them together behind one thread-safe handle and
//! reports every state transition through an
//! [`EventSink`](troof_types::EventSink).

pub mod challenge;
pub mod directory;
pub mod enrollment;
pub mod error;
pub mod hub;
pub mod limiter;
pub mod roster;
pub mod verifier;

pub use challenge::{Challenge, ChallengeBook, ChallengeState};
pub use directory::{Directory, Participant};
pub use enrollment::{EnrollmentAuthority, EnrollmentCode, EnrolledIdentity, StaticEnrollment};
pub use error::{ConsumeError, PresenceError};
pub use hub::{HubServices, PresenceHub, SenderHello, SweepReport, VerifyRequest, VerifyTarget};
pub use limiter::{RateLimiter, TokenBucket};
pub use roster::{RosterBook, RosterInput};
pub use verifier::{canonical_payload, CanonicalFields, SignedResponse};
