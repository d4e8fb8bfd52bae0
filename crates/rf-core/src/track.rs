//! Track model
//!
//! A track is either an audio or a MIDI lane. Mixer properties (volume, pan,
//! mute, solo) are the lease-guarded "property group" of a track; the ordered
//! region list mirrors which regions sit on it.

use serde::{Deserialize, Serialize};

use crate::{RegionId, TrackId};

/// Track content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    #[default]
    Audio,
    Midi,
}

/// Instrument loaded on a MIDI track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentRef {
    /// Instrument preset/engine id
    pub instrument_id: String,
    /// Category (synth, sampler, drums...)
    pub instrument_category: String,
}

/// Arrangement track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Unique identifier
    pub id: TrackId,
    /// Display name
    pub name: String,
    /// Audio or MIDI
    #[serde(rename = "type")]
    pub track_type: TrackType,

    // === Mixer State ===
    /// Linear volume (0.0 - 2.0)
    #[serde(default = "default_volume")]
    pub volume: f64,
    /// Pan position (-1.0 left to 1.0 right)
    #[serde(default)]
    pub pan: f64,
    /// Mute state
    #[serde(default)]
    pub mute: bool,
    /// Solo state
    #[serde(default)]
    pub solo: bool,

    /// Instrument (MIDI tracks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<InstrumentRef>,
    /// Regions on this track, in timeline order
    #[serde(default)]
    pub region_ids: Vec<RegionId>,
    /// Track color (RGB)
    #[serde(default = "default_color")]
    pub color: u32,
}

fn default_volume() -> f64 {
    1.0
}

fn default_color() -> u32 {
    0x808080
}

/// Maximum linear volume
pub const MAX_TRACK_VOLUME: f64 = 2.0;

impl Track {
    /// Create a new track with default mixer settings
    pub fn new(id: TrackId, name: impl Into<String>, track_type: TrackType) -> Self {
        Self {
            id,
            name: name.into(),
            track_type,
            volume: default_volume(),
            pan: 0.0,
            mute: false,
            solo: false,
            instrument: None,
            region_ids: Vec::new(),
            color: default_color(),
        }
    }

    /// Create an audio track
    pub fn audio(id: TrackId, name: impl Into<String>) -> Self {
        Self::new(id, name, TrackType::Audio)
    }

    /// Create a MIDI track
    pub fn midi(id: TrackId, name: impl Into<String>) -> Self {
        Self::new(id, name, TrackType::Midi)
    }

    /// Apply a partial update, clamping mixer values into range
    pub fn apply(&mut self, update: &TrackUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(volume) = update.volume {
            self.volume = volume.clamp(0.0, MAX_TRACK_VOLUME);
        }
        if let Some(pan) = update.pan {
            self.pan = pan.clamp(-1.0, 1.0);
        }
        if let Some(mute) = update.mute {
            self.mute = mute;
        }
        if let Some(solo) = update.solo {
            self.solo = solo;
        }
        if let Some(color) = update.color {
            self.color = color;
        }
    }

    /// Attach a region id (no-op if already present)
    pub fn attach_region(&mut self, region_id: RegionId) {
        if !self.region_ids.contains(&region_id) {
            self.region_ids.push(region_id);
        }
    }

    /// Detach a region id
    pub fn detach_region(&mut self, region_id: &RegionId) -> bool {
        let before = self.region_ids.len();
        self.region_ids.retain(|id| id != region_id);
        before != self.region_ids.len()
    }
}

/// Partial track update
///
/// Only the fields that are `Some` travel on the wire and get applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pan: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solo: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
}

impl TrackUpdate {
    pub fn volume(volume: f64) -> Self {
        Self {
            volume: Some(volume),
            ..Default::default()
        }
    }

    pub fn pan(pan: f64) -> Self {
        Self {
            pan: Some(pan),
            ..Default::default()
        }
    }

    /// Shallow merge: fields set in `newer` win
    pub fn merge(&mut self, newer: TrackUpdate) {
        if newer.name.is_some() {
            self.name = newer.name;
        }
        if newer.volume.is_some() {
            self.volume = newer.volume;
        }
        if newer.pan.is_some() {
            self.pan = newer.pan;
        }
        if newer.mute.is_some() {
            self.mute = newer.mute;
        }
        if newer.solo.is_some() {
            self.solo = newer.solo;
        }
        if newer.color.is_some() {
            self.color = newer.color;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
