//! MIDI note model
//!
//! Notes live inside the MIDI content of a region; their positions are in
//! beats relative to the region start.

use serde::{Deserialize, Serialize};

use crate::NoteId;

/// Highest valid MIDI pitch/velocity
pub const MIDI_MAX: u8 = 127;

/// A note inside a MIDI region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    /// MIDI pitch (0-127)
    pub pitch: u8,
    /// MIDI velocity (0-127)
    pub velocity: u8,
    /// Start in beats, relative to the region
    #[serde(default)]
    pub start: f64,
    /// Gate length in beats
    pub duration: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Note {
    pub fn new(id: NoteId, pitch: u8, velocity: u8, start: f64, duration: f64) -> Self {
        Self {
            id,
            pitch: pitch.min(MIDI_MAX),
            velocity: velocity.min(MIDI_MAX),
            start,
            duration,
            enabled: true,
        }
    }

    /// End position in beats (relative to the region)
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn apply(&mut self, update: &NoteUpdate) {
        if let Some(pitch) = update.pitch {
            self.pitch = pitch.min(MIDI_MAX);
        }
        if let Some(velocity) = update.velocity {
            self.velocity = velocity.min(MIDI_MAX);
        }
        if let Some(start) = update.start {
            self.start = start.max(0.0);
        }
        if let Some(duration) = update.duration {
            self.duration = duration.max(0.0);
        }
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
    }
}

/// Partial note update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl NoteUpdate {
    /// Shallow merge: fields set in `newer` win
    pub fn merge(&mut self, newer: NoteUpdate) {
        if newer.pitch.is_some() {
            self.pitch = newer.pitch;
        }
        if newer.velocity.is_some() {
            self.velocity = newer.velocity;
        }
        if newer.start.is_some() {
            self.start = newer.start;
        }
        if newer.duration.is_some() {
            self.duration = newer.duration;
        }
        if newer.enabled.is_some() {
            self.enabled = newer.enabled;
        }
    }

    /// Clamp pitch/velocity into MIDI range before sending
    pub fn clamped(mut self) -> Self {
        self.pitch = self.pitch.map(|p| p.min(MIDI_MAX));
        self.velocity = self.velocity.map(|v| v.min(MIDI_MAX));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_clamps_midi_range() {
        let note = Note::new(NoteId::new("n1"), 200, 130, 0.0, 1.0);
        assert_eq!(note.pitch, 127);
        assert_eq!(note.velocity, 127);
        assert_eq!(note.end(), 1.0);
    }

    #[test]
    fn test_apply_update() {
        let mut note = Note::new(NoteId::new("n1"), 60, 100, 0.0, 1.0);
        note.apply(&NoteUpdate {
            pitch: Some(64),
            start: Some(-1.0),
            enabled: Some(false),
            ..Default::default()
        });
        assert_eq!(note.pitch, 64);
        assert_eq!(note.start, 0.0);
        assert!(!note.enabled);
        assert_eq!(note.velocity, 100);
    }

    #[test]
    fn test_clamped_update() {
        let update = NoteUpdate {
            pitch: Some(255),
            ..Default::default()
        }
        .clamped();
        assert_eq!(update.pitch, Some(127));
    }
}
