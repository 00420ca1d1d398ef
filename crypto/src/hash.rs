//! SHA-256 hashing and key fingerprints.

use sha2::{Digest, Sha256};

/// Length of a key fingerprint in hex characters.
pub const FINGERPRINT_HEX_LEN: usize = 12;

/// Compute the SHA-256 digest of arbitrary data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Short key id: the first 12 hex characters of SHA-256 over the DER
/// SubjectPublicKeyInfo. Matches the id the enrollment service assigns.
pub fn key_fingerprint(spki_der: &[u8]) -> String {
    let mut id = hex::encode(sha256(spki_der));
    id.truncate(FINGERPRINT_HEX_LEN);
    id
}
