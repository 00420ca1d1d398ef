//! Enrollment codes handed out by the SSO/enrollment service.
//!
//! A sender presenting a valid code is announced under the canonical
//! participant id the code maps to and marked enrolled.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use troof_types::ParticipantId;

/// Canonical identity behind an enrollment code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrolledIdentity {
    pub participant_id: ParticipantId,
    pub display_name: String,
}

/// Resolves enrollment codes.
pub trait EnrollmentAuthority: Send + Sync {
    fn resolve(&self, code: &str) -> Option<EnrolledIdentity>;
}

/// One configured enrollment code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentCode {
    pub code: String,
    pub participant_id: String,
    pub display_name: String,
}

/// Fixed code table loaded from configuration. Codes are matched after
/// trimming, case-sensitively.
#[derive(Clone, Debug, Default)]
pub struct StaticEnrollment {
    codes: HashMap<String, EnrolledIdentity>,
}

impl StaticEnrollment {
    pub fn new(codes: impl IntoIterator<Item = EnrollmentCode>) -> Self {
        let codes = codes
            .into_iter()
            .map(|c| {
                (
                    c.code.trim().to_string(),
                    EnrolledIdentity {
                        participant_id: ParticipantId::new(c.participant_id),
                        display_name: c.display_name,
                    },
                )
            })
            .collect();
        Self { codes }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl EnrollmentAuthority for StaticEnrollment {
    fn resolve(&self, code: &str) -> Option<EnrolledIdentity> {
        self.codes.get(code.trim()).cloned()
    }
}
