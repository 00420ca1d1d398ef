//! ECDSA P-256 / SHA-256 signature verification.

use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_FIXED};

use crate::{der::der_to_raw, CryptoError, P256PublicKey};

/// Verify a raw `r ‖ s` signature over `message`.
///
/// Returns `true` if the signature is valid, `false` otherwise.
pub fn verify_signature(message: &[u8], raw_signature: &[u8; 64], key: &P256PublicKey) -> bool {
    UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, key.point())
        .verify(message, raw_signature)
        .is_ok()
}

/// Verify a hex-encoded DER signature as carried on the wire.
///
/// `Ok(false)` means well-formed but invalid; `Err` means the hex or DER
/// could not be decoded at all.
pub fn verify_der_hex(
    message: &[u8],
    signature_hex: &str,
    key: &P256PublicKey,
) -> Result<bool, CryptoError> {
    let der = hex::decode(signature_hex.trim()).map_err(|_| CryptoError::InvalidHex)?;
    let raw = der_to_raw(&der)?;
    Ok(verify_signature(message, &raw, key))
}
