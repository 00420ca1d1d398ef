//! P-256 public keys in PEM / SubjectPublicKeyInfo form.
//!
//! Participants register the PEM their hardware signer exports
//! (`-----BEGIN PUBLIC KEY-----`). Only uncompressed named-curve P-256 keys
//! are accepted; the SPKI header for those is a fixed 26-byte prefix.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::{hash::key_fingerprint, CryptoError};

/// DER prefix of an `id-ecPublicKey` / `prime256v1` SPKI with a 65-byte
/// uncompressed point.
const SPKI_P256_PREFIX: [u8; 26] = [
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08,
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];
/// Uncompressed SEC1 point length (0x04 ‖ X ‖ Y).
const POINT_LEN: usize = 65;

/// A parsed P-256 public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct P256PublicKey {
    point: [u8; POINT_LEN],
}

impl P256PublicKey {
    /// Build from an uncompressed SEC1 point.
    pub fn from_point(point: &[u8]) -> Result<Self, CryptoError> {
        let point: [u8; POINT_LEN] = point
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("point is {} bytes", point.len())))?;
        if point[0] != 0x04 {
            return Err(CryptoError::InvalidKey("point is not uncompressed".into()));
        }
        Ok(Self { point })
    }

    /// Parse a DER SubjectPublicKeyInfo.
    pub fn from_spki_der(der: &[u8]) -> Result<Self, CryptoError> {
        match der.strip_prefix(&SPKI_P256_PREFIX[..]) {
            Some(point) => Self::from_point(point),
            None => Err(CryptoError::InvalidKey(
                "algorithm is not id-ecPublicKey/prime256v1".into(),
            )),
        }
    }

    /// Parse a PEM-armoured SubjectPublicKeyInfo.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let body: String = pem
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with("-----"))
            .collect::<Vec<_>>()
            .concat();
        if body.is_empty() {
            return Err(CryptoError::InvalidPem("empty body".into()));
        }
        let der = STANDARD
            .decode(body.as_bytes())
            .map_err(|e| CryptoError::InvalidPem(e.to_string()))?;
        Self::from_spki_der(&der)
    }

    /// The uncompressed SEC1 point.
    pub fn point(&self) -> &[u8] {
        &self.point
    }

    pub fn to_spki_der(&self) -> Vec<u8> {
        let mut der = Vec::with_capacity(SPKI_P256_PREFIX.len() + POINT_LEN);
        der.extend_from_slice(&SPKI_P256_PREFIX);
        der.extend_from_slice(&self.point);
        der
    }

    pub fn to_pem(&self) -> String {
        let b64 = STANDARD.encode(self.to_spki_der());
        let mut pem = String::from("-----BEGIN PUBLIC KEY-----\n");
        for chunk in b64.as_bytes().chunks(64) {
            pem.push_str(&String::from_utf8_lossy(chunk));
            pem.push('\n');
        }
        pem.push_str("-----END PUBLIC KEY-----\n");
        pem
    }

    /// Short key id (see [`key_fingerprint`]).
    pub fn key_id(&self) -> String {
        key_fingerprint(&self.to_spki_der())
    }
}
