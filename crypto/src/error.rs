use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid PEM: {0}")]
    InvalidPem(String),

    #[error("not a P-256 SubjectPublicKeyInfo: {0}")]
    InvalidKey(String),

    #[error("signature is not valid hex")]
    InvalidHex,

    #[error("malformed DER signature: {0}")]
    MalformedSignature(&'static str),

    #[error("system randomness unavailable: {0}")]
    Random(String),
}
