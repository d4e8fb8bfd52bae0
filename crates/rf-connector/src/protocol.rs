//! Relay wire protocol
//!
//! Every frame is one JSON text message. Outbound frames carry the room and
//! the local user next to the event payload; inbound frames carry the
//! sender (absent for relay-originated messages such as `state_sync`).
//!
//! ```text
//! {"event":"track_update","roomId":"r1","userId":"u1","trackId":"T1","updates":{"volume":0.5}}
//! ```

use rf_core::{
    EffectChain, Marker, MarkerId, MarkerUpdate, Note, NoteId, NoteUpdate, ProjectScale,
    RecordingPreview, Region, RegionDrag, RegionId, RegionUpdate, RoomId, SynthState,
    TimeSignature, Track, TrackId, TrackUpdate, UserId,
};
use rf_state::{LeaseInfo, LeaseType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ═══════════════════════════════════════════════════════════════════════════════
// CONNECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Relay connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// WebSocket URL (ws:// or wss://)
    pub url: String,

    /// Connection timeout in milliseconds
    pub timeout_ms: u32,

    /// Reconnect after the socket drops
    pub auto_reconnect: bool,

    /// Pause between reconnect attempts in milliseconds
    pub reconnect_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3001".to_string(),
            timeout_ms: 5000,
            auto_reconnect: true,
            reconnect_delay_ms: 2000,
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Connected and ready
    Connected,
    /// Connection lost, waiting to reconnect
    Reconnecting,
    /// Gave up after an error
    Error,
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTBOUND
// ═══════════════════════════════════════════════════════════════════════════════

/// Frame sent to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    pub room_id: RoomId,
    pub user_id: UserId,
    #[serde(flatten)]
    pub event: ClientEvent,
}

impl OutboundEnvelope {
    pub fn new(room_id: RoomId, user_id: UserId, event: ClientEvent) -> Self {
        Self {
            room_id,
            user_id,
            event,
        }
    }
}

/// Events a participant emits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinRoom {
        username: String,
    },
    RequestState,

    TrackAdd {
        track: Track,
    },
    TrackUpdate {
        track_id: TrackId,
        updates: TrackUpdate,
    },
    TrackDelete {
        track_id: TrackId,
    },
    TrackReorder {
        track_ids: Vec<TrackId>,
    },
    TrackInstrumentChange {
        track_id: TrackId,
        instrument_id: String,
        instrument_category: String,
    },

    RegionAdd {
        region: Region,
    },
    RegionUpdate {
        region_id: RegionId,
        updates: RegionUpdate,
    },
    RegionMove {
        region_id: RegionId,
        delta_beats: f64,
    },
    RegionDrag {
        updates: Vec<RegionDrag>,
    },
    RegionDelete {
        region_id: RegionId,
    },

    NoteAdd {
        region_id: RegionId,
        note: Note,
    },
    NoteUpdate {
        region_id: RegionId,
        note_id: NoteId,
        updates: NoteUpdate,
    },
    NoteDelete {
        region_id: RegionId,
        note_id: NoteId,
    },

    EffectChainUpdate {
        track_id: TrackId,
        chain_type: String,
        effect_chain: EffectChain,
    },
    SynthParamsUpdate {
        track_id: TrackId,
        params: SynthState,
    },

    BpmChange {
        bpm: f64,
    },
    TimeSignatureChange {
        time_signature: TimeSignature,
    },
    ProjectScaleChange {
        project_scale: ProjectScale,
    },

    SelectionChange {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selected_track_id: Option<TrackId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selected_region_ids: Option<Vec<RegionId>>,
    },

    LockAcquire {
        element_id: String,
        #[serde(rename = "type")]
        lease_type: LeaseType,
    },
    LockRelease {
        element_id: String,
    },

    MarkerAdd {
        marker: Marker,
    },
    MarkerUpdate {
        marker_id: MarkerId,
        updates: MarkerUpdate,
    },
    MarkerDelete {
        marker_id: MarkerId,
    },

    RecordingPreview {
        preview: RecordingPreview,
    },
    RecordingPreviewEnd,

    FullStateUpdate {
        state: FullState,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// INBOUND
// ═══════════════════════════════════════════════════════════════════════════════

/// Frame received from the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEnvelope {
    /// Originating participant (absent for relay-originated messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(flatten)]
    pub event: ServerEvent,
}

impl InboundEnvelope {
    pub fn new(user_id: Option<UserId>, event: ServerEvent) -> Self {
        Self { user_id, event }
    }

    pub fn from_user(user_id: impl Into<UserId>, event: ServerEvent) -> Self {
        Self::new(Some(user_id.into()), event)
    }

    pub fn from_relay(event: ServerEvent) -> Self {
        Self::new(None, event)
    }

    /// Decode one text frame
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Events the relay delivers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    UserJoined {
        #[serde(default)]
        username: String,
    },
    UserLeft,

    StateSync(StateSync),

    TrackAdded {
        track: Track,
    },
    TrackUpdated {
        track_id: TrackId,
        updates: TrackUpdate,
    },
    TrackDeleted {
        track_id: TrackId,
    },
    TrackReordered {
        track_ids: Vec<TrackId>,
    },
    TrackInstrumentChanged {
        track_id: TrackId,
        instrument_id: String,
        #[serde(default)]
        instrument_category: String,
    },

    RegionAdded {
        region: Region,
    },
    RegionUpdated {
        region_id: RegionId,
        updates: RegionUpdate,
    },
    RegionMoved {
        region_id: RegionId,
        delta_beats: f64,
    },
    RegionDragged {
        #[serde(default)]
        updates: Vec<RegionDrag>,
    },
    RegionDeleted {
        region_id: RegionId,
    },

    NoteAdded {
        region_id: RegionId,
        note: Note,
    },
    NoteUpdated {
        region_id: RegionId,
        note_id: NoteId,
        updates: NoteUpdate,
    },
    NoteDeleted {
        region_id: RegionId,
        note_id: NoteId,
    },

    EffectChainUpdated {
        track_id: TrackId,
        chain_type: String,
        effect_chain: EffectChain,
    },
    SynthParamsUpdated {
        track_id: TrackId,
        params: SynthState,
    },

    BpmChanged {
        bpm: f64,
    },
    TimeSignatureChanged {
        time_signature: TimeSignature,
    },
    ProjectScaleChanged {
        project_scale: ProjectScale,
    },

    SelectionChanged {
        #[serde(default)]
        selected_track_id: Option<TrackId>,
        #[serde(default)]
        selected_region_ids: Option<Vec<RegionId>>,
    },

    LockAcquired {
        element_id: String,
        lease_info: LeaseInfo,
    },
    LockReleased {
        element_id: String,
    },
    LockConflict {
        element_id: String,
        #[serde(default)]
        locked_by: Option<LockHolder>,
    },

    MarkerAdded {
        marker: Marker,
    },
    MarkerUpdated {
        marker_id: MarkerId,
        updates: MarkerUpdate,
    },
    MarkerDeleted {
        marker_id: MarkerId,
    },

    RecordingPreview {
        preview: RecordingPreview,
    },
    RecordingPreviewEnd,

    FullStateUpdate {
        state: FullState,
    },
    ProjectLoaded {
        project: StateSync,
    },
}

/// `lockedBy` of a lock conflict: a full lease or just a username
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LockHolder {
    Lease(LeaseInfo),
    Username(String),
}

impl LockHolder {
    pub fn username(&self) -> &str {
        match self {
            LockHolder::Lease(lease) => &lease.username,
            LockHolder::Username(name) => name,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SNAPSHOTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Canonical room snapshot. Every collection may be missing on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StateSync {
    pub tracks: Vec<Track>,
    pub regions: Vec<Region>,
    pub locks: BTreeMap<String, LeaseInfo>,
    pub selected_track_id: Option<TrackId>,
    pub selected_region_ids: Vec<RegionId>,
    pub bpm: Option<f64>,
    pub time_signature: Option<TimeSignature>,
    pub project_scale: Option<ProjectScale>,
    pub synth_states: BTreeMap<TrackId, SynthState>,
    pub effect_chains: Vec<EffectChain>,
    pub markers: Vec<Marker>,
    pub voice_states: BTreeMap<String, Value>,
    pub broadcast_states: BTreeMap<String, Value>,
}

/// Broadcast full-state rewrite (remote undo/redo). Only the parts present
/// are replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FullState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracks: Option<Vec<Track>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regions: Option<Vec<Region>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markers: Option<Vec<Marker>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_signature: Option<TimeSignature>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RELAY EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// What the connector reports to the session
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// Socket (re)established
    Connected,
    /// Decoded inbound frame
    Message(InboundEnvelope),
    /// Socket lost; `reconnecting` tells whether another attempt follows
    Disconnected { reconnecting: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_envelope_shape() {
        let envelope = OutboundEnvelope::new(
            RoomId::new("room"),
            UserId::new("u1"),
            ClientEvent::TrackUpdate {
                track_id: TrackId::new("T1"),
                updates: TrackUpdate::volume(0.5),
            },
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "track_update",
                "roomId": "room",
                "userId": "u1",
                "trackId": "T1",
                "updates": { "volume": 0.5 }
            })
        );
    }

    #[test]
    fn test_lock_acquire_carries_type() {
        let envelope = OutboundEnvelope::new(
            RoomId::new("room"),
            UserId::new("u1"),
            ClientEvent::LockAcquire {
                element_id: "track_T1_property".into(),
                lease_type: LeaseType::TrackProperty,
            },
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["event"], "lock_acquire");
        assert_eq!(value["elementId"], "track_T1_property");
        assert_eq!(value["type"], "track_property");
    }

    #[test]
    fn test_unit_events() {
        let value = serde_json::to_value(OutboundEnvelope::new(
            RoomId::new("room"),
            UserId::new("u1"),
            ClientEvent::RequestState,
        ))
        .unwrap();
        assert_eq!(value, json!({ "event": "request_state", "roomId": "room", "userId": "u1" }));
    }

    #[test]
    fn test_inbound_sender_is_optional() {
        let with_sender =
            InboundEnvelope::parse(r#"{"event":"track_deleted","userId":"u2","trackId":"T1"}"#)
                .unwrap();
        assert_eq!(with_sender.user_id, Some(UserId::new("u2")));
        assert_eq!(
            with_sender.event,
            ServerEvent::TrackDeleted {
                track_id: TrackId::new("T1")
            }
        );

        let from_relay = InboundEnvelope::parse(r#"{"event":"state_sync"}"#).unwrap();
        assert_eq!(from_relay.user_id, None);
        assert_eq!(from_relay.event, ServerEvent::StateSync(StateSync::default()));
    }

    #[test]
    fn test_partial_state_sync_defaults() {
        let text = r#"{
            "event": "state_sync",
            "tracks": [{"id":"T1","name":"Keys","type":"midi"}],
            "bpm": 98,
            "locks": {"region_R1": {"userId":"u3","type":"region"}}
        }"#;
        let envelope = InboundEnvelope::parse(text).unwrap();
        let ServerEvent::StateSync(sync) = envelope.event else {
            panic!("expected state_sync");
        };
        assert_eq!(sync.tracks.len(), 1);
        assert_eq!(sync.bpm, Some(98.0));
        assert!(sync.regions.is_empty());
        assert!(sync.markers.is_empty());
        assert_eq!(sync.locks["region_R1"].user_id, UserId::new("u3"));
    }

    #[test]
    fn test_unknown_event_fails_to_decode() {
        assert!(InboundEnvelope::parse(r#"{"event":"spin_started","userId":"u1"}"#).is_err());
        assert!(InboundEnvelope::parse("not json").is_err());
    }

    #[test]
    fn test_region_drag_batch() {
        let text = r#"{"event":"region_dragged","userId":"u2",
            "updates":[{"regionId":"R1","newStart":7},{"regionId":"R2","newStart":1.5,"trackId":"T2"}]}"#;
        let envelope = InboundEnvelope::parse(text).unwrap();
        let ServerEvent::RegionDragged { updates } = envelope.event else {
            panic!("expected region_dragged");
        };
        assert_eq!(updates[0], RegionDrag::new(RegionId::new("R1"), 7.0));
        assert_eq!(updates[1].track_id, Some(TrackId::new("T2")));
    }

    #[test]
    fn test_lock_conflict_holder_shapes() {
        let by_name = InboundEnvelope::parse(
            r#"{"event":"lock_conflict","elementId":"region_R1","lockedBy":"Bob"}"#,
        )
        .unwrap();
        let ServerEvent::LockConflict { locked_by, .. } = by_name.event else {
            panic!("expected lock_conflict");
        };
        assert_eq!(locked_by, Some(LockHolder::Username("Bob".into())));

        let by_lease = InboundEnvelope::parse(
            r#"{"event":"lock_conflict","elementId":"region_R1",
                "lockedBy":{"userId":"u3","username":"Cleo","type":"region"}}"#,
        )
        .unwrap();
        let ServerEvent::LockConflict { locked_by, .. } = by_lease.event else {
            panic!("expected lock_conflict");
        };
        assert!(matches!(locked_by, Some(LockHolder::Lease(ref l)) if l.user_id == UserId::new("u3")));
        assert_eq!(locked_by.as_ref().map(LockHolder::username), Some("Cleo"));

        let bare = InboundEnvelope::parse(r#"{"event":"lock_conflict","elementId":"region_R1"}"#)
            .unwrap();
        assert!(matches!(bare.event, ServerEvent::LockConflict { locked_by: None, .. }));
    }

    #[test]
    fn test_selection_without_regions_is_absent() {
        let envelope = InboundEnvelope::parse(
            r#"{"event":"selection_changed","userId":"u2","selectedTrackId":"T1"}"#,
        )
        .unwrap();
        assert_eq!(
            envelope.event,
            ServerEvent::SelectionChanged {
                selected_track_id: Some(TrackId::new("T1")),
                selected_region_ids: None,
            }
        );
    }

    #[test]
    fn test_full_state_skips_absent_parts() {
        let state = FullState {
            bpm: Some(100.0),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&state).unwrap(), json!({ "bpm": 100.0 }));
    }
}
