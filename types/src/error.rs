//! Errors raised while constructing core types from untrusted input.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("identity key is empty after normalization")]
    EmptyIdentity,

    #[error("unknown identity kind: {0}")]
    UnknownIdentityKind(String),

    #[error("unknown pattern discriminator: {0}")]
    UnknownPattern(String),
}
