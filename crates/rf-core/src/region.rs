//! Region model
//!
//! A region is a span on a track's timeline holding either MIDI content
//! (notes + sustain pedal events) or audio metadata (trim, gain, fades and a
//! reference to the decoded buffer).
//!
//! The decoded audio buffer is local-only: it is `#[serde(skip)]` and
//! [`Region::sanitized`] drops it explicitly, so a region serialized for the
//! wire carries metadata only.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{Note, NoteId, NoteUpdate, RegionId, RfError, RfResult, TrackId};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Shortest region length in beats
pub const MIN_REGION_LENGTH: f64 = 0.25;

/// Fewest loop iterations a looped region may have
pub const MIN_LOOP_ITERATIONS: u32 = 1;

// ═══════════════════════════════════════════════════════════════════════════════
// CONTENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Sustain pedal event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SustainEvent {
    /// Position in beats, relative to the region
    pub position: f64,
    /// Pedal down (true) or up (false)
    pub down: bool,
}

/// MIDI region payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MidiContent {
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub sustain_events: Vec<SustainEvent>,
}

/// Decoded audio samples (never leaves the process)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    /// One vector per channel
    pub channels: Vec<Vec<f32>>,
}

/// Audio region payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioContent {
    /// Reference to the audio asset the buffer was decoded from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_id: Option<String>,
    /// Trim from the asset start, in seconds
    #[serde(default)]
    pub trim_start: f64,
    /// Trim from the asset end, in seconds
    #[serde(default)]
    pub trim_end: f64,
    /// Linear gain
    #[serde(default = "unity_gain")]
    pub gain: f64,
    /// Fade in length in seconds
    #[serde(default)]
    pub fade_in: f64,
    /// Fade out length in seconds
    #[serde(default)]
    pub fade_out: f64,
    #[serde(skip)]
    pub buffer: Option<Arc<AudioBuffer>>,
}

fn unity_gain() -> f64 {
    1.0
}

impl Default for AudioContent {
    fn default() -> Self {
        Self {
            buffer_id: None,
            trim_start: 0.0,
            trim_end: 0.0,
            gain: unity_gain(),
            fade_in: 0.0,
            fade_out: 0.0,
            buffer: None,
        }
    }
}

/// Type-specific region payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RegionContent {
    Midi(MidiContent),
    Audio(AudioContent),
}

impl Default for RegionContent {
    fn default() -> Self {
        Self::Midi(MidiContent::default())
    }
}

/// Loop settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopSettings {
    pub enabled: bool,
    pub iterations: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            iterations: MIN_LOOP_ITERATIONS,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGION
// ═══════════════════════════════════════════════════════════════════════════════

/// A region on a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: RegionId,
    pub track_id: TrackId,
    #[serde(default)]
    pub name: String,
    /// Start in beats
    pub start: f64,
    /// Length in beats
    pub length: f64,
    #[serde(default, rename = "loop")]
    pub loop_settings: LoopSettings,
    #[serde(default)]
    pub content: RegionContent,
}

impl Region {
    pub fn midi(id: RegionId, track_id: TrackId, start: f64, length: f64) -> Self {
        Self {
            id,
            track_id,
            name: String::new(),
            start: start.max(0.0),
            length: length.max(MIN_REGION_LENGTH),
            loop_settings: LoopSettings::default(),
            content: RegionContent::Midi(MidiContent::default()),
        }
    }

    pub fn audio(
        id: RegionId,
        track_id: TrackId,
        start: f64,
        length: f64,
        content: AudioContent,
    ) -> Self {
        Self {
            id,
            track_id,
            name: String::new(),
            start: start.max(0.0),
            length: length.max(MIN_REGION_LENGTH),
            loop_settings: LoopSettings::default(),
            content: RegionContent::Audio(content),
        }
    }

    /// End position in beats (ignoring loops)
    pub fn end(&self) -> f64 {
        self.start + self.length
    }

    /// Copy suitable for the wire: the decoded audio buffer is dropped
    pub fn sanitized(&self) -> Region {
        let mut region = self.clone();
        if let RegionContent::Audio(audio) = &mut region.content {
            audio.buffer = None;
        }
        region
    }

    pub fn is_midi(&self) -> bool {
        matches!(self.content, RegionContent::Midi(_))
    }

    pub fn notes(&self) -> &[Note] {
        match &self.content {
            RegionContent::Midi(midi) => &midi.notes,
            RegionContent::Audio(_) => &[],
        }
    }

    fn midi_mut(&mut self) -> RfResult<&mut MidiContent> {
        match &mut self.content {
            RegionContent::Midi(midi) => Ok(midi),
            RegionContent::Audio(_) => Err(RfError::NotMidiRegion(self.id.clone())),
        }
    }

    /// Apply a partial update with the same clamping the realtime path uses
    pub fn apply(&mut self, update: &RegionUpdate) {
        if let Some(track_id) = &update.track_id {
            self.track_id = track_id.clone();
        }
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(start) = update.start {
            self.start = start.max(0.0);
        }
        if let Some(length) = update.length {
            self.length = length.max(MIN_REGION_LENGTH);
        }
        if let Some(enabled) = update.loop_enabled {
            self.loop_settings.enabled = enabled;
        }
        if let Some(iterations) = update.loop_iterations {
            self.loop_settings.iterations = round_iterations(iterations);
        }
    }

    /// Shift by a delta in beats, never before the timeline start
    pub fn move_by(&mut self, delta_beats: f64) {
        self.start = (self.start + delta_beats).max(0.0);
    }

    /// Insert or replace a note by id
    pub fn upsert_note(&mut self, note: Note) -> RfResult<()> {
        let midi = self.midi_mut()?;
        match midi.notes.iter_mut().find(|n| n.id == note.id) {
            Some(existing) => *existing = note,
            None => midi.notes.push(note),
        }
        Ok(())
    }

    pub fn update_note(&mut self, note_id: &NoteId, update: &NoteUpdate) -> RfResult<()> {
        let region_id = self.id.clone();
        let midi = self.midi_mut()?;
        let note = midi
            .notes
            .iter_mut()
            .find(|n| &n.id == note_id)
            .ok_or_else(|| RfError::NoteNotFound {
                region: region_id,
                note: note_id.clone(),
            })?;
        note.apply(update);
        Ok(())
    }

    pub fn remove_note(&mut self, note_id: &NoteId) -> RfResult<Note> {
        let region_id = self.id.clone();
        let midi = self.midi_mut()?;
        let idx = midi
            .notes
            .iter()
            .position(|n| &n.id == note_id)
            .ok_or_else(|| RfError::NoteNotFound {
                region: region_id,
                note: note_id.clone(),
            })?;
        Ok(midi.notes.remove(idx))
    }
}

fn round_iterations(iterations: f64) -> u32 {
    if iterations.is_finite() {
        (iterations.round().max(MIN_LOOP_ITERATIONS as f64)) as u32
    } else {
        MIN_LOOP_ITERATIONS
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// UPDATES
// ═══════════════════════════════════════════════════════════════════════════════

/// Partial region update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<TrackId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_iterations: Option<f64>,
}

impl RegionUpdate {
    /// Shallow merge: fields set in `newer` win
    pub fn merge(&mut self, newer: RegionUpdate) {
        if newer.track_id.is_some() {
            self.track_id = newer.track_id;
        }
        if newer.name.is_some() {
            self.name = newer.name;
        }
        if newer.start.is_some() {
            self.start = newer.start;
        }
        if newer.length.is_some() {
            self.length = newer.length;
        }
        if newer.loop_enabled.is_some() {
            self.loop_enabled = newer.loop_enabled;
        }
        if newer.loop_iterations.is_some() {
            self.loop_iterations = newer.loop_iterations;
        }
    }

    /// Realtime clamp: `start >= 0`, `length >= 0.25`, iterations rounded and `>= 1`
    pub fn clamped(mut self) -> Self {
        self.start = self.start.map(|s| s.max(0.0));
        self.length = self.length.map(|l| l.max(MIN_REGION_LENGTH));
        self.loop_iterations = self
            .loop_iterations
            .map(|i| round_iterations(i) as f64);
        self
    }
}

/// One entry of a `region_drag` batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionDrag {
    pub region_id: RegionId,
    pub new_start: f64,
    /// Set when the drag moved the region to another track
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<TrackId>,
}

impl RegionDrag {
    pub fn new(region_id: RegionId, new_start: f64) -> Self {
        Self {
            region_id,
            new_start: new_start.max(0.0),
            track_id: None,
        }
    }

    pub fn to_track(mut self, track_id: TrackId) -> Self {
        self.track_id = Some(track_id);
        self
    }

    pub fn clamped(mut self) -> Self {
        self.new_start = self.new_start.max(0.0);
        self
    }
}

/// Live preview of a take being recorded by a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingPreview {
    pub track_id: TrackId,
    /// Start in beats
    pub start: f64,
    /// Length recorded so far, in beats
    pub length: f64,
    /// Downsampled peak envelope for drawing
    #[serde(default)]
    pub peaks: Vec<f32>,
}
