//! Meeting roster storage trait.

use serde::{Deserialize, Serialize};

use troof_types::{MeetingId, PresenceView, Timestamp};

use crate::StoreError;

/// Snapshot of one meeting's roster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMeeting {
    pub meeting_id: MeetingId,
    pub updated_at: Timestamp,
    pub roster: Vec<PresenceView>,
}

pub trait RosterStore: Send + Sync {
    fn load_meetings(&self) -> Result<Vec<StoredMeeting>, StoreError>;

    /// Replace the stored rosters with `meetings`.
    fn save_meetings(&self, meetings: &[StoredMeeting]) -> Result<(), StoreError>;
}
