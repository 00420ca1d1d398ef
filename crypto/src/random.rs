//! Randomness for challenge ids, nonces and pattern selection.

use crate::CryptoError;

/// Source of unpredictable bytes.
///
/// Production code uses [`OsRandom`]; tests substitute a deterministic
/// sequence so that challenge ids are predictable.
pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, buf: &mut [u8]) -> Result<(), CryptoError>;
}

/// Operating-system CSPRNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, buf: &mut [u8]) -> Result<(), CryptoError> {
        getrandom::getrandom(buf).map_err(|e| CryptoError::Random(e.to_string()))
    }
}

/// `n_bytes` random bytes, lower-case hex encoded.
pub fn random_hex(source: &dyn RandomSource, n_bytes: usize) -> Result<String, CryptoError> {
    let mut buf = vec![0u8; n_bytes];
    source.fill_bytes(&mut buf)?;
    Ok(hex::encode(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_random_produces_distinct_tokens() {
        let a = random_hex(&OsRandom, 12).unwrap();
        let b = random_hex(&OsRandom, 12).unwrap();
        assert_eq!(a.len(), 24);
        assert_ne!(a, b);
    }
}
