//! Storage contracts for the Troof hub.
//!
//! The presence core survives restarts through two whole-value load/save
//! contracts: the public-key directory and the meeting rosters. Every
//! backend implements these traits; the rest of the codebase depends only on
//! the traits. [`JsonFileStore`] is the bundled file-backed implementation.

pub mod error;
pub mod json;
pub mod keys;
pub mod roster;

pub use error::StoreError;
pub use json::JsonFileStore;
pub use keys::{KeyMap, KeyStore};
pub use roster::{RosterStore, StoredMeeting};
