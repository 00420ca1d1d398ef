//! DER-encoded ECDSA signatures → raw fixed-width form.
//!
//! Signers (WebCrypto-less platforms, TPM services, OpenSSL) emit
//!
//! ```text
//! SEQUENCE { INTEGER r, INTEGER s }
//! ```
//!
//! while the P-256 verification primitive expects `r ‖ s`, each left-padded
//! with zeros to 32 bytes. Anything that does not decode cleanly is an
//! error, never a panic.

use crate::CryptoError;

const TAG_SEQUENCE: u8 = 0x30;
const TAG_INTEGER: u8 = 0x02;
/// Width of one P-256 scalar.
const SCALAR_LEN: usize = 32;

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn byte(&mut self) -> Result<u8, CryptoError> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or(CryptoError::MalformedSignature("truncated"))?;
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, tag: u8) -> Result<(), CryptoError> {
        if self.byte()? != tag {
            return Err(CryptoError::MalformedSignature("unexpected tag"));
        }
        Ok(())
    }

    /// Short form, or long form with one or two length octets.
    fn length(&mut self) -> Result<usize, CryptoError> {
        let first = self.byte()?;
        if first < 0x80 {
            return Ok(first as usize);
        }
        let octets = (first & 0x7f) as usize;
        if octets == 0 || octets > 2 {
            return Err(CryptoError::MalformedSignature("unsupported length form"));
        }
        let mut len = 0usize;
        for _ in 0..octets {
            len = (len << 8) | self.byte()? as usize;
        }
        Ok(len)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CryptoError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(CryptoError::MalformedSignature("truncated"))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn integer(&mut self) -> Result<[u8; SCALAR_LEN], CryptoError> {
        self.expect(TAG_INTEGER)?;
        let len = self.length()?;
        let mut value = self.take(len)?;
        while let [0, rest @ ..] = value {
            value = rest;
        }
        if value.len() > SCALAR_LEN {
            return Err(CryptoError::MalformedSignature("component wider than 32 bytes"));
        }
        let mut out = [0u8; SCALAR_LEN];
        out[SCALAR_LEN - value.len()..].copy_from_slice(value);
        Ok(out)
    }
}

/// Decode a DER ECDSA signature into raw `r ‖ s` (64 bytes).
pub fn der_to_raw(der: &[u8]) -> Result<[u8; 64], CryptoError> {
    let mut reader = Reader { bytes: der, pos: 0 };
    reader.expect(TAG_SEQUENCE)?;
    let seq_len = reader.length()?;
    let seq_end = reader
        .pos
        .checked_add(seq_len)
        .ok_or(CryptoError::MalformedSignature("truncated"))?;
    if seq_end != der.len() {
        return Err(CryptoError::MalformedSignature("sequence length mismatch"));
    }

    let r = reader.integer()?;
    let s = reader.integer()?;
    if reader.pos != seq_end {
        return Err(CryptoError::MalformedSignature("trailing bytes"));
    }

    let mut raw = [0u8; 64];
    raw[..SCALAR_LEN].copy_from_slice(&r);
    raw[SCALAR_LEN..].copy_from_slice(&s);
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn der(r: &[u8], s: &[u8]) -> Vec<u8> {
        let mut body = vec![TAG_INTEGER, r.len() as u8];
        body.extend_from_slice(r);
        body.extend_from_slice(&[TAG_INTEGER, s.len() as u8]);
        body.extend_from_slice(s);
        let mut out = vec![TAG_SEQUENCE, body.len() as u8];
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn strips_sign_byte_and_pads_short_components() {
        let mut r = vec![0x00];
        r.extend_from_slice(&[0x80; 32]);
        let s = vec![0x01, 0x02];
        let raw = der_to_raw(&der(&r, &s)).unwrap();
        assert_eq!(&raw[..32], &[0x80; 32]);
        assert_eq!(&raw[32..62], &[0u8; 30]);
        assert_eq!(&raw[62..], &[0x01, 0x02]);
    }

    #[test]
    fn rejects_wrong_outer_tag() {
        let mut sig = der(&[1], &[2]);
        sig[0] = 0x31;
        assert!(matches!(der_to_raw(&sig), Err(CryptoError::MalformedSignature(_))));
    }

    #[test]
    fn rejects_wrong_integer_tag() {
        let mut sig = der(&[1], &[2]);
        sig[2] = 0x04;
        assert!(der_to_raw(&sig).is_err());
    }

    #[test]
    fn rejects_trailing_bytes_after_sequence() {
        let mut sig = der(&[1], &[2]);
        sig.push(0x00);
        assert!(der_to_raw(&sig).is_err());
    }

    #[test]
    fn rejects_trailing_bytes_inside_sequence() {
        let mut sig = der(&[1], &[2]);
        sig.push(0x05);
        sig[1] += 1;
        assert_eq!(
            der_to_raw(&sig),
            Err(CryptoError::MalformedSignature("trailing bytes"))
        );
    }

    #[test]
    fn rejects_oversized_component() {
        let r = vec![0x7f; 33];
        assert_eq!(
            der_to_raw(&der(&r, &[1])),
            Err(CryptoError::MalformedSignature("component wider than 32 bytes"))
        );
    }

    #[test]
    fn rejects_truncated_input() {
        let sig = der(&[1; 32], &[2; 32]);
        assert!(der_to_raw(&sig[..sig.len() - 3]).is_err());
        assert!(der_to_raw(&[]).is_err());
        assert!(der_to_raw(&[TAG_SEQUENCE]).is_err());
    }

    #[test]
    fn accepts_long_form_length() {
        let inner = der(&[0x11; 32], &[0x22; 32]);
        let body = &inner[2..];
        let mut sig = vec![TAG_SEQUENCE, 0x81, body.len() as u8];
        sig.extend_from_slice(body);
        let raw = der_to_raw(&sig).unwrap();
        assert_eq!(&raw[..32], &[0x11; 32]);
        assert_eq!(&raw[32..], &[0x22; 32]);
    }
}
