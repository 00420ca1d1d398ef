//! External identity keys reported by the presence feed.
//!
//! A meeting platform may expose an attendee by an opaque UUID, by an
//! e-mail address, or only by the display name typed into the client. All
//! three are modelled as one sum type so that roster matching can apply a
//! single precedence order: `Uuid > Email > DisplayName`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// The kind of an external identity key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityKind {
    #[serde(rename = "uuid", alias = "participantUUID")]
    Uuid,
    #[serde(rename = "email", alias = "zoomEmail")]
    Email,
    #[serde(rename = "displayName", alias = "display_name")]
    DisplayName,
}

impl IdentityKind {
    /// Matching confidence of this kind. Higher wins.
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Uuid => 3,
            Self::Email => 2,
            Self::DisplayName => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uuid => "uuid",
            Self::Email => "email",
            Self::DisplayName => "displayName",
        }
    }

    /// Parse the wire spelling of a kind, accepting the legacy field names.
    pub fn parse(raw: &str) -> Result<Self, TypesError> {
        match raw {
            "uuid" | "participantUUID" => Ok(Self::Uuid),
            "email" | "zoomEmail" => Ok(Self::Email),
            "displayName" | "display_name" => Ok(Self::DisplayName),
            other => Err(TypesError::UnknownIdentityKind(other.to_string())),
        }
    }

    /// Apply this kind's normalization rule to a raw key.
    ///
    /// E-mail addresses and display names are case-insensitive; UUIDs are
    /// opaque and only trimmed.
    pub fn normalize(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        match self {
            Self::Uuid => trimmed.to_string(),
            Self::Email | Self::DisplayName => trimmed.to_lowercase(),
        }
    }
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized external identity key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum ExternalIdentity {
    #[serde(rename = "uuid")]
    Uuid(String),
    #[serde(rename = "email")]
    Email(String),
    #[serde(rename = "displayName")]
    DisplayName(String),
}

impl ExternalIdentity {
    /// Build a normalized identity of the given kind.
    ///
    /// Fails if nothing is left after normalization.
    pub fn new(kind: IdentityKind, raw: &str) -> Result<Self, TypesError> {
        let key = kind.normalize(raw);
        if key.is_empty() {
            return Err(TypesError::EmptyIdentity);
        }
        Ok(match kind {
            IdentityKind::Uuid => Self::Uuid(key),
            IdentityKind::Email => Self::Email(key),
            IdentityKind::DisplayName => Self::DisplayName(key),
        })
    }

    pub fn kind(&self) -> IdentityKind {
        match self {
            Self::Uuid(_) => IdentityKind::Uuid,
            Self::Email(_) => IdentityKind::Email,
            Self::DisplayName(_) => IdentityKind::DisplayName,
        }
    }

    /// The normalized key string.
    pub fn key(&self) -> &str {
        match self {
            Self::Uuid(k) | Self::Email(k) | Self::DisplayName(k) => k,
        }
    }
}

impl fmt::Display for ExternalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_and_display_name_are_lowercased() {
        let email = ExternalIdentity::new(IdentityKind::Email, "  Maya.CISO@Company.com ").unwrap();
        assert_eq!(email.key(), "maya.ciso@company.com");
        let name = ExternalIdentity::new(IdentityKind::DisplayName, "Maya K").unwrap();
        assert_eq!(name.key(), "maya k");
    }

    #[test]
    fn uuid_keeps_case() {
        let uuid = ExternalIdentity::new(IdentityKind::Uuid, " AbC/dEf== ").unwrap();
        assert_eq!(uuid.key(), "AbC/dEf==");
    }

    #[test]
    fn blank_key_is_rejected() {
        assert_eq!(
            ExternalIdentity::new(IdentityKind::Email, "   "),
            Err(TypesError::EmptyIdentity)
        );
    }

    #[test]
    fn precedence_order() {
        assert!(IdentityKind::Uuid.precedence() > IdentityKind::Email.precedence());
        assert!(IdentityKind::Email.precedence() > IdentityKind::DisplayName.precedence());
    }

    #[test]
    fn legacy_kind_names_parse() {
        assert_eq!(IdentityKind::parse("participantUUID"), Ok(IdentityKind::Uuid));
        assert_eq!(IdentityKind::parse("zoomEmail"), Ok(IdentityKind::Email));
        assert!(IdentityKind::parse("phone").is_err());
        let kind: IdentityKind = serde_json::from_str("\"zoomEmail\"").unwrap();
        assert_eq!(kind, IdentityKind::Email);
    }
}
