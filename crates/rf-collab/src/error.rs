//! Sync error types

use rf_core::{RfError, TrackId};
use rf_connector::ConnectorError;
use thiserror::Error;

/// Sync layer errors
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Session not initialized")]
    SessionNotReady,

    #[error("Message '{0}' requires a sender")]
    MissingSender(&'static str),

    #[error("Apply failed: {0}")]
    Apply(#[from] RfError),

    #[error("Transport error: {0}")]
    Transport(#[from] ConnectorError),

    #[error("Instrument apply failed on track {track_id}: {reason}")]
    Instrument { track_id: TrackId, reason: String },

    #[error("Config IO error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;
