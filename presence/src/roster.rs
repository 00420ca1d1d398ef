//! Roster binder: per-meeting presence entries and their bindings to
//! participant identities.
//!
//! The presence feed delivers full snapshots of a meeting's attendees. Each
//! snapshot replaces the meeting's entry map, but bindings already
//! established for an identity key are carried over. Bindings only move to
//! a match of equal or higher [`BindingConfidence`].

use std::collections::HashMap;

use troof_store::StoredMeeting;
use troof_types::{
    BindingConfidence, ExternalIdentity, HubEvent, IdentityKind, MeetingId, ParticipantId,
    PresenceView, Timestamp,
};

use crate::directory::Participant;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub participant_id: ParticipantId,
    pub confidence: BindingConfidence,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresenceEntry {
    pub identity: ExternalIdentity,
    pub display_name: String,
    pub binding: Option<Binding>,
}

impl PresenceEntry {
    pub fn view(&self) -> PresenceView {
        PresenceView {
            identity_key: self.identity.key().to_string(),
            kind: self.identity.kind(),
            display_name: self.display_name.clone(),
            participant_id: self.binding.as_ref().map(|b| b.participant_id.clone()),
            confidence: self.binding.as_ref().map(|b| b.confidence),
        }
    }

    fn presence_event(&self, meeting_id: &MeetingId) -> Option<HubEvent> {
        let binding = self.binding.as_ref()?;
        Some(HubEvent::MeetingPresence {
            meeting_id: meeting_id.clone(),
            identity_key: self.identity.key().to_string(),
            kind: self.identity.kind(),
            participant_id: binding.participant_id.clone(),
            confidence: binding.confidence,
        })
    }
}

/// One row of an incoming roster snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RosterInput {
    pub identity: ExternalIdentity,
    pub display_name: String,
}

#[derive(Clone, Debug)]
pub struct Meeting {
    pub id: MeetingId,
    pub entries: HashMap<ExternalIdentity, PresenceEntry>,
    pub updated_at: Timestamp,
}

impl Meeting {
    fn new(id: MeetingId, now: Timestamp) -> Self {
        Self {
            id,
            entries: HashMap::new(),
            updated_at: now,
        }
    }

    /// Entries ordered by (kind, key).
    pub fn views(&self) -> Vec<PresenceView> {
        let mut entries: Vec<&PresenceEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            (a.identity.kind().as_str(), a.identity.key())
                .cmp(&(b.identity.kind().as_str(), b.identity.key()))
        });
        entries.into_iter().map(PresenceEntry::view).collect()
    }

    fn bound_participant(&self, identity: &ExternalIdentity) -> Option<&ParticipantId> {
        self.entries
            .get(identity)?
            .binding
            .as_ref()
            .map(|b| &b.participant_id)
    }
}

/// Confidence with which `participant` matches a roster row, if at all.
///
/// Explicit identities are compared first; the entry's display name is the
/// weakest signal.
pub fn match_confidence(
    identity: &ExternalIdentity,
    display_name: &str,
    participant: &Participant,
) -> Option<BindingConfidence> {
    if participant.claims(identity) {
        return Some(identity.kind().into());
    }
    let name = IdentityKind::DisplayName.normalize(display_name);
    if !name.is_empty() && name == participant.display_key() {
        return Some(BindingConfidence::DisplayName);
    }
    None
}

/// The single best live match among `candidates`.
///
/// Two different participants tying for the best confidence is ambiguous
/// and yields no match.
fn best_live_match(input: &RosterInput, candidates: &[Participant]) -> Option<Binding> {
    let mut best: Option<Binding> = None;
    let mut tied = false;
    for participant in candidates {
        let Some(confidence) = match_confidence(&input.identity, &input.display_name, participant)
        else {
            continue;
        };
        match best.as_ref().map(|b| b.confidence) {
            Some(current) if confidence < current => {}
            Some(current) if confidence == current => tied = true,
            _ => {
                best = Some(Binding {
                    participant_id: participant.id.clone(),
                    confidence,
                });
                tied = false;
            }
        }
    }
    if tied {
        tracing::debug!(identity = %input.identity, "ambiguous live match, left unbound");
        return None;
    }
    best
}

/// Result of applying a roster snapshot.
#[derive(Debug)]
pub struct RosterUpdate {
    pub roster: Vec<PresenceView>,
    /// `meeting_roster` followed by one `meeting_presence` per entry whose
    /// bound participant changed.
    pub events: Vec<HubEvent>,
}

#[derive(Default)]
pub struct RosterBook {
    meetings: HashMap<MeetingId, Meeting>,
}

impl RosterBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a meeting's entries with `inputs`, carrying bindings forward
    /// and binding to the best live match among `candidates`.
    pub fn set_roster(
        &mut self,
        meeting_id: &MeetingId,
        inputs: Vec<RosterInput>,
        candidates: &[Participant],
        now: Timestamp,
    ) -> RosterUpdate {
        let previous = self.meetings.remove(meeting_id);
        let previous_entries = previous.map(|m| m.entries).unwrap_or_default();

        let mut meeting = Meeting::new(meeting_id.clone(), now);
        for input in inputs {
            let carried = previous_entries
                .get(&input.identity)
                .and_then(|e| e.binding.clone());
            let live = best_live_match(&input, candidates);
            let binding = match (carried, live) {
                (Some(carried), Some(live)) if live.confidence >= carried.confidence => Some(live),
                (Some(carried), _) => Some(carried),
                (None, live) => live,
            };
            meeting.entries.insert(
                input.identity.clone(),
                PresenceEntry {
                    identity: input.identity,
                    display_name: input.display_name,
                    binding,
                },
            );
        }

        let roster = meeting.views();
        let mut events = vec![HubEvent::MeetingRoster {
            meeting_id: meeting_id.clone(),
            roster: roster.clone(),
        }];
        let mut changed: Vec<&PresenceEntry> = meeting
            .entries
            .values()
            .filter(|entry| {
                let before = previous_entries
                    .get(&entry.identity)
                    .and_then(|e| e.binding.as_ref())
                    .map(|b| &b.participant_id);
                let after = entry.binding.as_ref().map(|b| &b.participant_id);
                after.is_some() && after != before
            })
            .collect();
        changed.sort_by(|a, b| a.identity.key().cmp(b.identity.key()));
        events.extend(changed.into_iter().filter_map(|e| e.presence_event(meeting_id)));

        tracing::debug!(
            meeting_id = %meeting_id,
            entries = meeting.entries.len(),
            rebound = events.len() - 1,
            "roster applied"
        );
        self.meetings.insert(meeting_id.clone(), meeting);
        RosterUpdate { roster, events }
    }

    /// Administrator override: bind `identity` to `participant_id` with
    /// [`BindingConfidence::Manual`], creating the meeting and entry if
    /// needed.
    pub fn bind_attendee(
        &mut self,
        meeting_id: &MeetingId,
        identity: ExternalIdentity,
        participant_id: ParticipantId,
        now: Timestamp,
    ) -> HubEvent {
        let meeting = self
            .meetings
            .entry(meeting_id.clone())
            .or_insert_with(|| Meeting::new(meeting_id.clone(), now));
        meeting.updated_at = now;
        let entry = meeting
            .entries
            .entry(identity.clone())
            .or_insert_with(|| PresenceEntry {
                display_name: identity.key().to_string(),
                identity: identity.clone(),
                binding: None,
            });
        entry.binding = Some(Binding {
            participant_id: participant_id.clone(),
            confidence: BindingConfidence::Manual,
        });
        HubEvent::MeetingPresence {
            meeting_id: meeting_id.clone(),
            identity_key: identity.key().to_string(),
            kind: identity.kind(),
            participant_id,
            confidence: BindingConfidence::Manual,
        }
    }

    /// Bind a newly announced participant to the entries of its meeting it
    /// matches at least as well as their current binding.
    pub fn bind_live(&mut self, participant: &Participant) -> Vec<HubEvent> {
        let Some(meeting_id) = participant.meeting_id.as_ref() else {
            return Vec::new();
        };
        let Some(meeting) = self.meetings.get_mut(meeting_id) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for entry in meeting.entries.values_mut() {
            let Some(confidence) =
                match_confidence(&entry.identity, &entry.display_name, participant)
            else {
                continue;
            };
            let previous = entry.binding.as_ref();
            if previous.is_some_and(|b| confidence < b.confidence) {
                continue;
            }
            let rebound = previous.map(|b| &b.participant_id) != Some(&participant.id);
            entry.binding = Some(Binding {
                participant_id: participant.id.clone(),
                confidence,
            });
            if rebound {
                events.extend(entry.presence_event(meeting_id));
            }
        }
        events
    }

    /// Participant bound to `identity` in `meeting_id`.
    pub fn resolve(
        &self,
        meeting_id: &MeetingId,
        identity: &ExternalIdentity,
    ) -> Option<ParticipantId> {
        self.meetings
            .get(meeting_id)?
            .bound_participant(identity)
            .cloned()
    }

    /// Evict meetings whose last roster update is older than `idle_ttl_ms`.
    pub fn sweep_idle(&mut self, now: Timestamp, idle_ttl_ms: u64) -> Vec<MeetingId> {
        let mut evicted: Vec<MeetingId> = self
            .meetings
            .values()
            .filter(|m| m.updated_at.has_expired(idle_ttl_ms, now))
            .map(|m| m.id.clone())
            .collect();
        evicted.sort();
        for id in &evicted {
            self.meetings.remove(id);
        }
        evicted
    }

    pub fn get(&self, meeting_id: &MeetingId) -> Option<&Meeting> {
        self.meetings.get(meeting_id)
    }

    pub fn len(&self) -> usize {
        self.meetings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meetings.is_empty()
    }

    /// `meeting_roster` for every meeting, ordered by meeting id.
    pub fn roster_events(&self) -> Vec<HubEvent> {
        let mut meetings: Vec<&Meeting> = self.meetings.values().collect();
        meetings.sort_by(|a, b| a.id.cmp(&b.id));
        meetings
            .into_iter()
            .map(|m| HubEvent::MeetingRoster {
                meeting_id: m.id.clone(),
                roster: m.views(),
            })
            .collect()
    }

    pub fn to_stored(&self) -> Vec<StoredMeeting> {
        let mut stored: Vec<StoredMeeting> = self
            .meetings
            .values()
            .map(|m| StoredMeeting {
                meeting_id: m.id.clone(),
                updated_at: m.updated_at,
                roster: m.views(),
            })
            .collect();
        stored.sort_by(|a, b| a.meeting_id.cmp(&b.meeting_id));
        stored
    }

    /// Rebuild from a stored snapshot. Rows with an empty identity key are
    /// skipped.
    pub fn from_stored(stored: Vec<StoredMeeting>) -> Self {
        let mut book = Self::new();
        for snapshot in stored {
            let mut meeting = Meeting::new(snapshot.meeting_id.clone(), snapshot.updated_at);
            for row in snapshot.roster {
                let identity = match ExternalIdentity::new(row.kind, &row.identity_key) {
                    Ok(identity) => identity,
                    Err(e) => {
                        tracing::warn!(meeting_id = %snapshot.meeting_id, error = %e, "skipping stored roster row");
                        continue;
                    }
                };
                let binding = match (row.participant_id, row.confidence) {
                    (Some(participant_id), Some(confidence)) => Some(Binding {
                        participant_id,
                        confidence,
                    }),
                    _ => None,
                };
                meeting.entries.insert(
                    identity.clone(),
                    PresenceEntry {
                        identity,
                        display_name: row.display_name,
                        binding,
                    },
                );
            }
            book.meetings.insert(snapshot.meeting_id, meeting);
        }
        book
    }
}
