//! Identity directory: live participants, their registered keys and pinned
//! golden-state baselines.
//!
//! Keys outlive connections: `forget` drops the live participant but keeps
//! the key so a reconnecting signer does not have to register again.

use std::collections::HashMap;

use troof_crypto::P256PublicKey;
use troof_store::KeyMap;
use troof_types::{ExternalIdentity, IdentityKind, MeetingId, ParticipantId, ParticipantView};

use crate::PresenceError;

/// A connected participant.
#[derive(Clone, Debug, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub enrolled: bool,
    /// Meeting declared by the connection, if any.
    pub meeting_id: Option<MeetingId>,
    /// UUID / e-mail identities announced at connect time.
    pub identities: Vec<ExternalIdentity>,
    pub trust_score: f64,
}

impl Participant {
    /// Whether this participant claims `identity`, either explicitly or
    /// through its display name.
    pub fn claims(&self, identity: &ExternalIdentity) -> bool {
        match identity {
            ExternalIdentity::DisplayName(key) => self.display_key() == *key,
            other => self.identities.contains(other),
        }
    }

    /// Display name under the display-name normalization rule.
    pub fn display_key(&self) -> String {
        IdentityKind::DisplayName.normalize(&self.display_name)
    }
}

/// Input to [`Directory::announce`].
#[derive(Clone, Debug)]
pub struct Announcement {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub enrolled: bool,
    pub meeting_id: Option<MeetingId>,
    pub identities: Vec<ExternalIdentity>,
}

/// What an announce changed.
#[derive(Debug)]
pub struct AnnounceOutcome {
    pub participant: Participant,
    /// First announce, or first since the last `forget`.
    pub joined: bool,
    /// A stored key was revoked because the announce was not enrolled.
    pub key_cleared: bool,
}

pub struct Directory {
    live: HashMap<ParticipantId, Participant>,
    keys: KeyMap,
    baselines: HashMap<ParticipantId, String>,
    trust_initial: f64,
}

impl Directory {
    pub fn new(keys: KeyMap, trust_initial: f64) -> Self {
        Self {
            live: HashMap::new(),
            keys,
            baselines: HashMap::new(),
            trust_initial: trust_initial.clamp(0.0, 100.0),
        }
    }

    /// Idempotent upsert of a live participant.
    ///
    /// The trust score survives re-announces on the same connection; a
    /// participant announced after `forget` starts from the initial score.
    pub fn announce(&mut self, announcement: Announcement) -> AnnounceOutcome {
        let Announcement {
            participant_id,
            display_name,
            enrolled,
            meeting_id,
            identities,
        } = announcement;

        let joined = !self.live.contains_key(&participant_id);
        let trust_initial = self.trust_initial;
        let participant = self
            .live
            .entry(participant_id.clone())
            .or_insert_with(|| Participant {
                id: participant_id.clone(),
                display_name: String::new(),
                enrolled: false,
                meeting_id: None,
                identities: Vec::new(),
                trust_score: trust_initial,
            });
        participant.display_name = display_name;
        participant.enrolled = enrolled;
        participant.meeting_id = meeting_id;
        participant.identities = identities;
        let participant = participant.clone();

        let key_cleared = !enrolled && self.clear_key(&participant_id);
        if key_cleared {
            tracing::warn!(
                participant_id = %participant_id,
                "unenrolled announce for an id with a stored key; key revoked"
            );
        }

        AnnounceOutcome {
            participant,
            joined,
            key_cleared,
        }
    }

    /// Attach a public key to a live, enrolled participant. Returns the
    /// key id.
    ///
    /// Re-registering a different key drops the pinned baseline.
    pub fn register_key(&mut self, id: &ParticipantId, pem: &str) -> Result<String, PresenceError> {
        match self.live.get(id) {
            Some(p) if p.enrolled => {}
            _ => return Err(PresenceError::EnrollmentRequired(id.clone())),
        }
        let key = P256PublicKey::from_pem(pem)
            .map_err(|e| PresenceError::MalformedPayload(e.to_string()))?;
        let canonical = key.to_pem();
        if self.keys.get(id) != Some(&canonical) {
            self.baselines.remove(id);
        }
        self.keys.insert(id.clone(), canonical);
        Ok(key.key_id())
    }

    /// Drop the live participant. Keys and baselines are kept.
    pub fn forget(&mut self, id: &ParticipantId) -> Option<Participant> {
        self.live.remove(id)
    }

    /// Remove a stored key and its baseline. Returns whether a key existed.
    pub fn clear_key(&mut self, id: &ParticipantId) -> bool {
        self.baselines.remove(id);
        self.keys.remove(id).is_some()
    }

    /// Remove every stored key. Returns the ids that had one.
    pub fn clear_keys(&mut self) -> Vec<ParticipantId> {
        self.baselines.clear();
        std::mem::take(&mut self.keys).into_keys().collect()
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.live.get(id)
    }

    /// Live participants that declared `meeting`, ordered by id.
    pub fn in_meeting(&self, meeting: &MeetingId) -> Vec<Participant> {
        let mut found: Vec<Participant> = self
            .live
            .values()
            .filter(|p| p.meeting_id.as_ref() == Some(meeting))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// A live participant claiming `identity`, preferring those that
    /// declared `meeting`; ties break on id.
    pub fn find_claiming(
        &self,
        identity: &ExternalIdentity,
        meeting: &MeetingId,
    ) -> Option<ParticipantId> {
        self.live
            .values()
            .filter(|p| p.claims(identity))
            .min_by(|a, b| {
                let a_elsewhere = a.meeting_id.as_ref() != Some(meeting);
                let b_elsewhere = b.meeting_id.as_ref() != Some(meeting);
                a_elsewhere.cmp(&b_elsewhere).then_with(|| a.id.cmp(&b.id))
            })
            .map(|p| p.id.clone())
    }

    pub fn public_key(&self, id: &ParticipantId) -> Option<&str> {
        self.keys.get(id).map(String::as_str)
    }

    pub fn keys(&self) -> &KeyMap {
        &self.keys
    }

    pub fn baseline(&self, id: &ParticipantId) -> Option<&str> {
        self.baselines.get(id).map(String::as_str)
    }

    pub fn pin_baseline(&mut self, id: &ParticipantId, quote: &str) {
        self.baselines.insert(id.clone(), quote.to_string());
    }

    /// Store an updated trust score for a live participant and return it.
    ///
    /// A participant that is no longer live is scored from the initial value
    /// and nothing is stored.
    pub fn record_trust(&mut self, id: &ParticipantId, update: impl Fn(f64) -> f64) -> f64 {
        match self.live.get_mut(id) {
            Some(p) => {
                p.trust_score = update(p.trust_score);
                p.trust_score
            }
            None => update(self.trust_initial),
        }
    }

    pub fn trust_score(&self, id: &ParticipantId) -> f64 {
        self.live
            .get(id)
            .map(|p| p.trust_score)
            .unwrap_or(self.trust_initial)
    }

    pub fn view(&self, participant: &Participant) -> ParticipantView {
        ParticipantView {
            id: participant.id.clone(),
            display_name: participant.display_name.clone(),
            enrolled: participant.enrolled,
            has_key: self.keys.contains_key(&participant.id),
            trust_score: participant.trust_score,
            meeting_id: participant.meeting_id.clone(),
        }
    }

    /// Snapshot of every live participant, ordered by id.
    pub fn views(&self) -> Vec<ParticipantView> {
        let mut views: Vec<ParticipantView> = self.live.values().map(|p| self.view(p)).collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}
