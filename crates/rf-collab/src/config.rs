//! Session configuration
//!
//! Loaded from an optional JSON file. Every section defaults, so a file only
//! needs the values it changes:
//!
//! ```json
//! { "relay": { "url": "wss://relay.example/ws" }, "batching": { "effectChainMs": 250 } }
//! ```

use rf_connector::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::SyncResult;

/// Full client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Relay connection
    pub relay: ConnectionConfig,
    /// Batcher intervals
    pub batching: BatchIntervals,
    /// Room to join when none is given on the command line
    pub room_id: Option<String>,
    /// Display name when none is given on the command line
    pub username: Option<String>,
}

impl SyncConfig {
    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save as pretty JSON, creating parent directories
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> SyncResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Flush interval per batched message kind, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BatchIntervals {
    pub track_property_ms: u64,
    pub region_drag_ms: u64,
    pub region_realtime_ms: u64,
    pub note_realtime_ms: u64,
    pub synth_params_ms: u64,
    pub effect_chain_ms: u64,
    pub marker_ms: u64,
    pub recording_preview_ms: u64,
}

impl Default for BatchIntervals {
    fn default() -> Self {
        Self {
            track_property_ms: 50,
            region_drag_ms: 50,
            region_realtime_ms: 50,
            note_realtime_ms: 50,
            synth_params_ms: 100,
            effect_chain_ms: 500,
            marker_ms: 100,
            recording_preview_ms: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"batching":{"effectChainMs":250},"roomId":"jam"}"#).unwrap();
        assert_eq!(config.batching.effect_chain_ms, 250);
        assert_eq!(config.batching.track_property_ms, 50);
        assert_eq!(config.relay, ConnectionConfig::default());
        assert_eq!(config.room_id.as_deref(), Some("jam"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("collab.json");

        let mut config = SyncConfig::default();
        config.relay.url = "ws://relay.local:9000".into();
        config.username = Some("Ana".into());
        config.save_to(&path).unwrap();

        assert_eq!(SyncConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SyncConfig::load(dir.path().join("absent.json")),
            Err(crate::SyncError::ConfigIo(_))
        ));
    }
}
