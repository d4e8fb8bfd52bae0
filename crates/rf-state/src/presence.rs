//! Presence of the other participants
//!
//! Everything here is informational: who is in the room, what they have
//! selected, their voice/broadcast status and the take they are recording.
//! None of it feeds back into the document.

use rf_core::{RecordingPreview, RegionId, UserId};
use serde_json::Value;

use crate::Selection;
use std::collections::BTreeMap;

/// Remote participant state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Presence {
    /// Known participants (user id -> username)
    pub users: BTreeMap<UserId, String>,
    /// Region selections of remote participants
    pub selections: BTreeMap<UserId, Vec<RegionId>>,
    /// Opaque voice chat state, keyed as the relay sends it
    pub voice_states: BTreeMap<String, Value>,
    /// Opaque broadcast state, keyed as the relay sends it
    pub broadcast_states: BTreeMap<String, Value>,
    /// Live recording previews
    pub recording_previews: BTreeMap<UserId, RecordingPreview>,
    /// Selection carried by the last room snapshot
    pub snapshot_selection: Selection,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_joined(&mut self, user_id: UserId, username: impl Into<String>) {
        self.users.insert(user_id, username.into());
    }

    /// Forget everything about a participant
    pub fn user_left(&mut self, user_id: &UserId) {
        self.users.remove(user_id);
        self.selections.remove(user_id);
        self.recording_previews.remove(user_id);
        self.voice_states.remove(user_id.as_str());
        self.broadcast_states.remove(user_id.as_str());
    }

    pub fn set_selection(&mut self, user_id: UserId, region_ids: Vec<RegionId>) {
        if region_ids.is_empty() {
            self.selections.remove(&user_id);
        } else {
            self.selections.insert(user_id, region_ids);
        }
    }

    /// `None` clears the preview (recording ended)
    pub fn set_recording_preview(&mut self, user_id: UserId, preview: Option<RecordingPreview>) {
        match preview {
            Some(preview) => {
                self.recording_previews.insert(user_id, preview);
            }
            None => {
                self.recording_previews.remove(&user_id);
            }
        }
    }

    /// Destructive replace of the snapshot-carried parts
    pub fn replace_aux(
        &mut self,
        voice_states: BTreeMap<String, Value>,
        broadcast_states: BTreeMap<String, Value>,
        snapshot_selection: Selection,
    ) {
        self.voice_states = voice_states;
        self.broadcast_states = broadcast_states;
        self.snapshot_selection = snapshot_selection;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
