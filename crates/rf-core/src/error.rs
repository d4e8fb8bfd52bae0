//! Error types for the document model

use thiserror::Error;

use crate::{MarkerId, NoteId, RegionId, TrackId};

/// Core error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RfError {
    #[error("Track not found: {0}")]
    TrackNotFound(TrackId),

    #[error("Region not found: {0}")]
    RegionNotFound(RegionId),

    #[error("Note {note} not found in region {region}")]
    NoteNotFound { region: RegionId, note: NoteId },

    #[error("Marker not found: {0}")]
    MarkerNotFound(MarkerId),

    #[error("Region {0} does not hold MIDI content")]
    NotMidiRegion(RegionId),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),
}

/// Result type alias
pub type RfResult<T> = Result<T, RfError>;
