//! Nullable signer: an in-process stand-in for the participant's
//! hardware-backed signing service.

use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};
use troof_crypto::P256PublicKey;

/// Holds a software P-256 key and produces DER signatures, hex encoded,
/// exactly as the real signer returns them.
pub struct NullSigner {
    keypair: EcdsaKeyPair,
    public: P256PublicKey,
    rng: SystemRandom,
}

impl NullSigner {
    /// Generate a fresh key pair.
    pub fn generate() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .expect("P-256 key generation");
        let keypair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
            .expect("freshly generated PKCS#8 parses");
        let public = P256PublicKey::from_point(keypair.public_key().as_ref())
            .expect("ring returns an uncompressed P-256 point");
        Self {
            keypair,
            public,
            rng,
        }
    }

    pub fn public_key(&self) -> &P256PublicKey {
        &self.public
    }

    /// The PEM the signer would hand to `register_pubkey`.
    pub fn public_pem(&self) -> String {
        self.public.to_pem()
    }

    pub fn key_id(&self) -> String {
        self.public.key_id()
    }

    /// Sign `message` (UTF-8 canonical payload), returning hex DER.
    pub fn sign_hex(&self, message: &str) -> String {
        let sig = self
            .keypair
            .sign(&self.rng, message.as_bytes())
            .expect("ECDSA signing");
        hex::encode(sig.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_verify_against_public_pem() {
        let signer = NullSigner::generate();
        let key = P256PublicKey::from_pem(&signer.public_pem()).unwrap();
        let sig = signer.sign_hex("m1|p1|c1|N1|5|A");
        assert_eq!(
            troof_crypto::verify_der_hex(b"m1|p1|c1|N1|5|A", &sig, &key),
            Ok(true)
        );
    }
}
