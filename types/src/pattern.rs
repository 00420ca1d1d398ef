//! Binary pattern discriminator carried inside every challenge.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pattern {
    A,
    B,
}

impl Pattern {
    /// Pick a pattern from one random byte.
    pub fn from_random_byte(byte: u8) -> Self {
        if byte & 1 == 0 {
            Self::A
        } else {
            Self::B
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, TypesError> {
        match raw {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            other => Err(TypesError::UnknownPattern(other.to_string())),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
