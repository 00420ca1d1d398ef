//! Nullable infrastructure for deterministic testing.
//!
//! All external dependencies of the presence core (clock, randomness,
//! storage, observer fan-out, the participant's hardware signer) are
//! abstracted behind traits. This crate provides test-friendly
//! implementations that:
//! - Return deterministic values
//! - Can be controlled programmatically
//! - Never touch the filesystem or network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod clock;
pub mod random;
pub mod sink;
pub mod signer;
pub mod store;

pub use clock::NullClock;
pub use random::NullRandom;
pub use signer::NullSigner;
pub use sink::NullEventSink;
pub use store::NullStore;
