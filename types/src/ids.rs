//! String identifiers for participants, meetings and challenges.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Stable identifier of a participant (e.g. `acme:maya` after enrollment).
    ParticipantId
);

string_id!(
    /// Identifier of a meeting as chosen by the presence feed.
    MeetingId
);

string_id!(
    /// Unguessable token naming one issued challenge.
    ChallengeId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ParticipantId::new("p1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"p1\"");
        let back: MeetingId = serde_json::from_str("\"m1\"").unwrap();
        assert_eq!(back.as_str(), "m1");
    }
}
