//! Cryptographic primitives for the Troof hub.
//!
//! - **ECDSA P-256 / SHA-256** signature verification (via `ring`)
//! - **DER → raw** conversion of ECDSA signatures (r‖s, 32 bytes each)
//! - **PEM / SPKI** parsing of participant public keys
//! - **SHA-256** key fingerprints
//! - Unguessable random tokens for challenges and nonces

pub mod der;
pub mod error;
pub mod hash;
pub mod keys;
pub mod random;
pub mod sign;

pub use der::der_to_raw;
pub use error::CryptoError;
pub use hash::{key_fingerprint, sha256};
pub use keys::P256PublicKey;
pub use random::{random_hex, OsRandom, RandomSource};
pub use sign::{verify_der_hex, verify_signature};
