//! Sync Coordinator
//!
//! Sole mediator between local intents, the relay transport, the document
//! stores and the lease table.
//!
//! Outbound: a local edit is applied to the document first (optimistic) and
//! then handed to a `sync_*` method, which emits it right away or queues it
//! in the batcher for its kind. Every `sync_*` is a silent no-op while no
//! session is bound or while a remote message is being applied.
//!
//! Inbound: [`SyncCoordinator::handle_inbound`] filters (echo guard, unbound
//! session, paused, own echo) and applies the message with the echo guard
//! engaged, so nothing it touches is sent back out.

use rf_connector::{
    ClientEvent, FullState, InboundEnvelope, LockHolder, OutboundEnvelope, ServerEvent,
    Transport,
};
use rf_core::{
    ChainKey, EffectChain, InstrumentRef, Marker, MarkerId, MarkerUpdate, Note, NoteId,
    NoteUpdate, ProjectScale, RecordingPreview, Region, RegionDrag, RegionId, RegionUpdate,
    RoomId, SynthState, TimeSignature, Track, TrackId, TrackUpdate, UserId,
};
use rf_state::{
    Document, LeaseInfo, LeaseType, LockManager, Presence, region_element, track_property_element,
};
use std::time::{Duration, Instant};

use crate::{
    BatchIntervals, Clock, Coalesce, EchoGuard, HostWork, InstrumentHost, NoteEdit, NullHost,
    SyncError, SyncResult, SystemClock, ThrottledBatcher, snapshot,
};

// ═══════════════════════════════════════════════════════════════════════════════
// SESSION
// ═══════════════════════════════════════════════════════════════════════════════

/// Who we are in which room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub username: String,
}

impl SessionIdentity {
    pub fn new(room_id: RoomId, user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            room_id,
            user_id,
            username: username.into(),
        }
    }
}

struct Session {
    identity: SessionIdentity,
    transport: Box<dyn Transport>,
}

/// Why an inbound message was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Arrived while another remote message was being applied
    EchoGuardEngaged,
    /// No session bound
    SessionUnbound,
    /// Incoming application is paused
    Paused,
    /// Our own message coming back
    SelfEcho,
}

/// Result of [`SyncCoordinator::handle_inbound`]
#[derive(Debug)]
pub enum InboundOutcome {
    Applied,
    Dropped(DropReason),
    Failed(SyncError),
}

impl InboundOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, InboundOutcome::Applied)
    }
}

/// Noteworthy things that happened while handling inbound traffic
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SnapshotApplied { tracks: usize, solicited: bool },
    FullStateApplied,
    ProjectLoaded { by: Option<UserId> },
    UserJoined { user_id: UserId, username: String },
    UserLeft { user_id: UserId, released: Vec<String> },
    LockConflict { element_id: String, locked_by: Option<LockHolder> },
}

/// Counters for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub emitted: u64,
    pub send_errors: u64,
    pub applied: u64,
    pub dropped: u64,
    pub failed: u64,
    pub lock_conflicts: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// BATCHERS
// ═══════════════════════════════════════════════════════════════════════════════

struct Batchers {
    track_property: ThrottledBatcher<TrackId, TrackUpdate>,
    region_drag: ThrottledBatcher<RegionId, RegionDrag>,
    region_realtime: ThrottledBatcher<RegionId, RegionUpdate>,
    note_realtime: ThrottledBatcher<NoteId, NoteEdit>,
    synth_params: ThrottledBatcher<TrackId, SynthState>,
    effect_chain: ThrottledBatcher<ChainKey, EffectChain>,
    marker: ThrottledBatcher<MarkerId, MarkerUpdate>,
    recording_preview: ThrottledBatcher<(), RecordingPreview>,
}

/// `Some(now)` polls, `None` forces
fn take<K, V>(batcher: &mut ThrottledBatcher<K, V>, now: Option<Instant>) -> Vec<(K, V)>
where
    K: Eq + std::hash::Hash,
    V: Coalesce,
{
    match now {
        Some(now) => batcher.poll(now).unwrap_or_default(),
        None => batcher.flush(),
    }
}

impl Batchers {
    fn new(intervals: &BatchIntervals) -> Self {
        let ms = Duration::from_millis;
        Self {
            track_property: ThrottledBatcher::new(ms(intervals.track_property_ms)),
            region_drag: ThrottledBatcher::new(ms(intervals.region_drag_ms)),
            region_realtime: ThrottledBatcher::new(ms(intervals.region_realtime_ms)),
            note_realtime: ThrottledBatcher::new(ms(intervals.note_realtime_ms)),
            synth_params: ThrottledBatcher::new(ms(intervals.synth_params_ms)),
            effect_chain: ThrottledBatcher::new(ms(intervals.effect_chain_ms)),
            marker: ThrottledBatcher::new(ms(intervals.marker_ms)),
            recording_preview: ThrottledBatcher::new(ms(intervals.recording_preview_ms)),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.track_property.deadline(),
            self.region_drag.deadline(),
            self.region_realtime.deadline(),
            self.note_realtime.deadline(),
            self.synth_params.deadline(),
            self.effect_chain.deadline(),
            self.marker.deadline(),
            self.recording_preview.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn cancel_all(&mut self) -> usize {
        self.track_property.cancel()
            + self.region_drag.cancel()
            + self.region_realtime.cancel()
            + self.note_realtime.cancel()
            + self.synth_params.cancel()
            + self.effect_chain.cancel()
            + self.marker.cancel()
            + self.recording_preview.cancel()
    }

    fn drain_region_drag(&mut self, now: Option<Instant>) -> Option<ClientEvent> {
        let updates: Vec<RegionDrag> = take(&mut self.region_drag, now)
            .into_iter()
            .map(|(_, drag)| drag)
            .collect();
        (!updates.is_empty()).then_some(ClientEvent::RegionDrag { updates })
    }

    /// Drop queued edits that target a deleted track
    fn purge_track(&mut self, track_id: &TrackId) {
        self.track_property.remove(track_id);
        self.synth_params.remove(track_id);
        self.effect_chain.retain(|key, _| &key.track_id != track_id);
    }

    /// Drop queued edits that target a deleted region or its notes
    fn purge_region(&mut self, region_id: &RegionId) {
        self.region_drag.remove(region_id);
        self.region_realtime.remove(region_id);
        self.note_realtime.retain(|_, edit| &edit.region_id != region_id);
    }

    /// Wire messages for everything due (or everything, when forced)
    fn drain(&mut self, now: Option<Instant>) -> Vec<ClientEvent> {
        let mut events = Vec::new();

        for (track_id, updates) in take(&mut self.track_property, now) {
            events.push(ClientEvent::TrackUpdate { track_id, updates });
        }
        events.extend(self.drain_region_drag(now));
        for (region_id, updates) in take(&mut self.region_realtime, now) {
            events.push(ClientEvent::RegionUpdate { region_id, updates });
        }
        for (note_id, edit) in take(&mut self.note_realtime, now) {
            events.push(ClientEvent::NoteUpdate {
                region_id: edit.region_id,
                note_id,
                updates: edit.updates,
            });
        }
        for (track_id, params) in take(&mut self.synth_params, now) {
            events.push(ClientEvent::SynthParamsUpdate { track_id, params });
        }
        for (key, effect_chain) in take(&mut self.effect_chain, now) {
            events.push(ClientEvent::EffectChainUpdate {
                track_id: key.track_id,
                chain_type: key.chain_type,
                effect_chain,
            });
        }
        for (marker_id, updates) in take(&mut self.marker, now) {
            events.push(ClientEvent::MarkerUpdate { marker_id, updates });
        }
        for ((), preview) in take(&mut self.recording_preview, now) {
            events.push(ClientEvent::RecordingPreview { preview });
        }

        events
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COORDINATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Collaboration state of one participant
pub struct SyncCoordinator {
    document: Document,
    locks: LockManager,
    presence: Presence,
    guard: EchoGuard,
    session: Option<Session>,
    paused: bool,
    awaiting_snapshot: bool,
    batchers: Batchers,
    host: Box<dyn InstrumentHost>,
    clock: Box<dyn Clock>,
    events: Vec<SessionEvent>,
    stats: SyncStats,
}

impl SyncCoordinator {
    pub fn new(intervals: &BatchIntervals) -> Self {
        Self {
            document: Document::new(),
            locks: LockManager::new(),
            presence: Presence::new(),
            guard: EchoGuard::new(),
            session: None,
            paused: false,
            awaiting_snapshot: false,
            batchers: Batchers::new(intervals),
            host: Box::new(NullHost),
            clock: Box::new(SystemClock),
            events: Vec::new(),
            stats: SyncStats::default(),
        }
    }

    pub fn with_host(mut self, host: impl InstrumentHost + 'static) -> Self {
        self.host = Box::new(host);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    // ─── accessors ─────────────────────────────────────────────────────────────

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Local intents mutate the document through here, then call `sync_*`
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    pub fn echo_guard(&self) -> &EchoGuard {
        &self.guard
    }

    pub fn identity(&self) -> Option<&SessionIdentity> {
        self.session.as_ref().map(|s| &s.identity)
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn awaiting_snapshot(&self) -> bool {
        self.awaiting_snapshot
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Drain accumulated session events
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════

    /// Bind to a room. Repeat calls with the same identity are no-ops; a
    /// different identity tears the current session down first.
    pub fn initialize(
        &mut self,
        transport: Box<dyn Transport>,
        room_id: RoomId,
        user_id: UserId,
        username: impl Into<String>,
    ) {
        let identity = SessionIdentity::new(room_id, user_id, username);
        if let Some(session) = &self.session {
            if session.identity == identity {
                log::debug!("[Sync] Already initialized for {}", identity.room_id);
                return;
            }
            self.cleanup();
        }
        log::info!(
            "[Sync] Joined room {} as {} ({})",
            identity.room_id,
            identity.username,
            identity.user_id
        );
        self.session = Some(Session {
            identity,
            transport,
        });
        self.paused = false;
    }

    /// Announce ourselves to the room
    pub fn join_room(&mut self) -> bool {
        let Some(username) = self.identity().map(|i| i.username.clone()) else {
            return false;
        };
        self.emit(ClientEvent::JoinRoom { username })
    }

    /// Release our leases, drop queued edits, unbind
    pub fn cleanup(&mut self) {
        let dropped = self.batchers.cancel_all();
        if dropped > 0 {
            log::debug!("[Sync] Dropped {} queued edits", dropped);
        }

        if let Some(user_id) = self.identity().map(|i| i.user_id.clone()) {
            for element_id in self.locks.release_all_for_user(&user_id) {
                self.emit(ClientEvent::LockRelease { element_id });
            }
            log::info!("[Sync] Left room");
        }

        self.session = None;
        self.paused = false;
        self.awaiting_snapshot = false;
    }

    /// Ask the relay for the canonical room state
    pub fn request_snapshot(&mut self) -> bool {
        if self.session.is_none() {
            return false;
        }
        self.awaiting_snapshot = true;
        self.emit(ClientEvent::RequestState)
    }

    /// Stop applying inbound messages (outbound keeps flowing)
    pub fn pause_incoming(&mut self) {
        log::info!("[Sync] Incoming paused");
        self.paused = true;
    }

    /// Resume inbound application and resynchronize
    pub fn resume_incoming(&mut self) {
        log::info!("[Sync] Incoming resumed");
        self.paused = false;
        self.request_snapshot();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TIMERS
    // ═══════════════════════════════════════════════════════════════════════

    /// Earliest batcher deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.batchers.next_deadline()
    }

    /// Flush every batcher whose deadline has passed; returns frames sent
    pub fn poll_timers(&mut self, now: Instant) -> usize {
        let events = self.batchers.drain(Some(now));
        self.emit_all(events)
    }

    /// [`poll_timers`](Self::poll_timers) at the coordinator's own clock
    pub fn tick(&mut self) -> usize {
        let now = self.clock.now();
        self.poll_timers(now)
    }

    /// Flush every batcher now
    pub fn flush_all(&mut self) -> usize {
        let events = self.batchers.drain(None);
        self.emit_all(events)
    }

    /// Drag gesture ended: send the final positions now
    pub fn end_region_drag(&mut self) {
        if let Some(event) = self.batchers.drain_region_drag(None) {
            self.emit(event);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // OUTBOUND
    // ═══════════════════════════════════════════════════════════════════════

    fn can_sync(&self) -> bool {
        self.session.is_some() && !self.guard.is_engaged()
    }

    fn emit(&mut self, event: ClientEvent) -> bool {
        let Some(session) = self.session.as_mut() else {
            log::debug!("[Sync] {}: dropping {:?}", SyncError::SessionNotReady, event);
            return false;
        };
        let envelope = OutboundEnvelope::new(
            session.identity.room_id.clone(),
            session.identity.user_id.clone(),
            event,
        );
        match session.transport.emit(envelope) {
            Ok(()) => {
                self.stats.emitted += 1;
                true
            }
            Err(e) => {
                self.stats.send_errors += 1;
                log::warn!("[Sync] {}", SyncError::Transport(e));
                false
            }
        }
    }

    fn emit_all(&mut self, events: Vec<ClientEvent>) -> usize {
        events
            .into_iter()
            .map(|event| self.emit(event))
            .filter(|sent| *sent)
            .count()
    }

    fn emit_if_ready(&mut self, event: ClientEvent) {
        if self.can_sync() {
            self.emit(event);
        }
    }

    // ─── tracks ────────────────────────────────────────────────────────────────

    pub fn sync_track_add(&mut self, track: &Track) {
        self.emit_if_ready(ClientEvent::TrackAdd {
            track: track.clone(),
        });
    }

    pub fn sync_track_update(&mut self, track_id: &TrackId, updates: TrackUpdate) {
        if self.can_sync() {
            let now = self.clock.now();
            self.batchers
                .track_property
                .push(track_id.clone(), updates, now);
        }
    }

    pub fn sync_track_delete(&mut self, track_id: &TrackId) {
        if !self.can_sync() {
            return;
        }
        self.batchers.purge_track(track_id);
        self.emit(ClientEvent::TrackDelete {
            track_id: track_id.clone(),
        });
    }

    pub fn sync_track_reorder(&mut self, track_ids: Vec<TrackId>) {
        self.emit_if_ready(ClientEvent::TrackReorder { track_ids });
    }

    pub fn sync_track_instrument(&mut self, track_id: &TrackId, instrument: &InstrumentRef) {
        self.emit_if_ready(ClientEvent::TrackInstrumentChange {
            track_id: track_id.clone(),
            instrument_id: instrument.instrument_id.clone(),
            instrument_category: instrument.instrument_category.clone(),
        });
    }

    // ─── regions ───────────────────────────────────────────────────────────────

    /// Sends metadata only; the decoded audio buffer never leaves
    pub fn sync_region_add(&mut self, region: &Region) {
        self.emit_if_ready(ClientEvent::RegionAdd {
            region: region.sanitized(),
        });
    }

    /// Realtime region edit (resize, loop, rename), batched
    pub fn sync_region_update(&mut self, region_id: &RegionId, updates: RegionUpdate) {
        if self.can_sync() {
            let now = self.clock.now();
            self.batchers
                .region_realtime
                .push(region_id.clone(), updates, now);
        }
    }

    pub fn sync_region_move(&mut self, region_id: &RegionId, delta_beats: f64) {
        self.emit_if_ready(ClientEvent::RegionMove {
            region_id: region_id.clone(),
            delta_beats,
        });
    }

    /// One drag step; only the latest position per region is sent
    pub fn sync_region_drag(&mut self, drag: RegionDrag) {
        if self.can_sync() {
            let now = self.clock.now();
            self.batchers
                .region_drag
                .push(drag.region_id.clone(), drag, now);
        }
    }

    pub fn sync_region_delete(&mut self, region_id: &RegionId) {
        if !self.can_sync() {
            return;
        }
        self.batchers.purge_region(region_id);
        self.emit(ClientEvent::RegionDelete {
            region_id: region_id.clone(),
        });
    }

    // ─── notes ─────────────────────────────────────────────────────────────────

    pub fn sync_note_add(&mut self, region_id: &RegionId, note: &Note) {
        self.emit_if_ready(ClientEvent::NoteAdd {
            region_id: region_id.clone(),
            note: note.clone(),
        });
    }

    pub fn sync_note_update(&mut self, region_id: &RegionId, note_id: &NoteId, updates: NoteUpdate) {
        if self.can_sync() {
            let now = self.clock.now();
            let edit = NoteEdit {
                region_id: region_id.clone(),
                updates,
            };
            self.batchers.note_realtime.push(note_id.clone(), edit, now);
        }
    }

    pub fn sync_note_delete(&mut self, region_id: &RegionId, note_id: &NoteId) {
        if !self.can_sync() {
            return;
        }
        self.batchers.note_realtime.remove(note_id);
        self.emit(ClientEvent::NoteDelete {
            region_id: region_id.clone(),
            note_id: note_id.clone(),
        });
    }

    // ─── instruments & effects ─────────────────────────────────────────────────

    pub fn sync_synth_params(&mut self, track_id: &TrackId, params: SynthState) {
        if self.can_sync() {
            let now = self.clock.now();
            self.batchers
                .synth_params
                .push(track_id.clone(), params, now);
        }
    }

    pub fn sync_effect_chain(&mut self, chain: &EffectChain) {
        if self.can_sync() {
            let now = self.clock.now();
            self.batchers
                .effect_chain
                .push(chain.key(), chain.clone(), now);
        }
    }

    // ─── project settings ──────────────────────────────────────────────────────

    pub fn sync_bpm(&mut self, bpm: f64) {
        self.emit_if_ready(ClientEvent::BpmChange { bpm });
    }

    pub fn sync_time_signature(&mut self, time_signature: TimeSignature) {
        self.emit_if_ready(ClientEvent::TimeSignatureChange { time_signature });
    }

    pub fn sync_project_scale(&mut self, project_scale: ProjectScale) {
        self.emit_if_ready(ClientEvent::ProjectScaleChange { project_scale });
    }

    /// Update the local selection and tell the room
    pub fn sync_selection(
        &mut self,
        selected_track_id: Option<TrackId>,
        selected_region_ids: Option<Vec<RegionId>>,
    ) {
        if let Some(track_id) = &selected_track_id {
            self.document.selection.track_id = Some(track_id.clone());
        }
        if let Some(region_ids) = &selected_region_ids {
            self.document.selection.region_ids = region_ids.clone();
        }
        self.emit_if_ready(ClientEvent::SelectionChange {
            selected_track_id,
            selected_region_ids,
        });
    }

    // ─── markers ───────────────────────────────────────────────────────────────

    pub fn sync_marker_add(&mut self, marker: &Marker) {
        self.emit_if_ready(ClientEvent::MarkerAdd {
            marker: marker.clone(),
        });
    }

    pub fn sync_marker_update(&mut self, marker_id: &MarkerId, updates: MarkerUpdate) {
        if self.can_sync() {
            let now = self.clock.now();
            self.batchers.marker.push(marker_id.clone(), updates, now);
        }
    }

    pub fn sync_marker_delete(&mut self, marker_id: &MarkerId) {
        if !self.can_sync() {
            return;
        }
        self.batchers.marker.remove(marker_id);
        self.emit(ClientEvent::MarkerDelete {
            marker_id: marker_id.clone(),
        });
    }

    // ─── recording ─────────────────────────────────────────────────────────────

    pub fn sync_recording_preview(&mut self, preview: RecordingPreview) {
        if self.can_sync() {
            let now = self.clock.now();
            self.batchers
                .recording_preview
                .push((), preview, now);
        }
    }

    /// Recording stopped; a still-queued preview would arrive after the end
    pub fn sync_recording_preview_end(&mut self) {
        if !self.can_sync() {
            return;
        }
        self.batchers.recording_preview.cancel();
        self.emit(ClientEvent::RecordingPreviewEnd);
    }

    // ─── bulk ──────────────────────────────────────────────────────────────────

    pub fn sync_full_state_update(&mut self, state: FullState) {
        self.emit_if_ready(ClientEvent::FullStateUpdate { state });
    }

    /// Broadcast the local document as a full-state rewrite (after undo/redo)
    pub fn broadcast_document(&mut self) {
        let state = snapshot::capture_full_state(&self.document);
        self.sync_full_state_update(state);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LEASES
    // ═══════════════════════════════════════════════════════════════════════

    /// Acquire a lease for the local user and announce it. Refused while
    /// a remote message is being applied, since it could not be announced.
    pub fn acquire_lock(&mut self, element_id: &str, lease_type: LeaseType) -> bool {
        if self.guard.is_engaged() {
            return false;
        }
        let Some(identity) = self.identity().cloned() else {
            return false;
        };
        if self.locks.is_locked_by_user(element_id, &identity.user_id) {
            return true;
        }
        let lease = LeaseInfo::new(identity.user_id, identity.username, lease_type);
        if !self.locks.acquire_lock(element_id, lease) {
            return false;
        }
        self.emit_if_ready(ClientEvent::LockAcquire {
            element_id: element_id.to_string(),
            lease_type,
        });
        true
    }

    /// Release a lease we hold. Queued edits go out first so the final
    /// value precedes the release.
    pub fn release_lock(&mut self, element_id: &str) -> bool {
        let Some(user_id) = self.identity().map(|i| i.user_id.clone()) else {
            return false;
        };
        if !self.locks.is_locked_by_user(element_id, &user_id) {
            return false;
        }
        self.flush_all();
        self.locks.release_lock(element_id, &user_id);
        self.emit_if_ready(ClientEvent::LockRelease {
            element_id: element_id.to_string(),
        });
        true
    }

    /// Mixer edit on a track; dropped (false) if another user holds the
    /// track's property lease
    pub fn edit_track_properties(&mut self, track_id: &TrackId, updates: TrackUpdate) -> bool {
        let element_id = track_property_element(track_id);
        if !self.document.tracks.contains(track_id) {
            log::warn!("[Sync] Edit on {} failed: no such track", element_id);
            return false;
        }
        if !self.acquire_lock(&element_id, LeaseType::TrackProperty) {
            log::debug!("[Sync] Edit on {} dropped: locked", element_id);
            return false;
        }
        if let Err(e) = self.document.update_track(track_id, &updates) {
            log::warn!("[Sync] Edit on {} failed: {}", element_id, e);
            return false;
        }
        self.sync_track_update(track_id, updates);
        true
    }

    /// Region edit; dropped (false) if another user holds the region lease
    pub fn edit_region(&mut self, region_id: &RegionId, updates: RegionUpdate) -> bool {
        let element_id = region_element(region_id);
        if !self.document.regions.contains(region_id) {
            log::warn!("[Sync] Edit on {} failed: no such region", element_id);
            return false;
        }
        if !self.acquire_lock(&element_id, LeaseType::Region) {
            log::debug!("[Sync] Edit on {} dropped: locked", element_id);
            return false;
        }
        let updates = updates.clamped();
        if let Err(e) = self.document.update_region(region_id, &updates) {
            log::warn!("[Sync] Edit on {} failed: {}", element_id, e);
            return false;
        }
        self.sync_region_update(region_id, updates);
        true
    }

    // ═══════════════════════════════════════════════════════════════════════
    // INBOUND
    // ═══════════════════════════════════════════════════════════════════════

    /// Filter and apply one inbound message
    pub fn handle_inbound(&mut self, envelope: InboundEnvelope) -> InboundOutcome {
        if let Some(reason) = self.drop_reason(&envelope) {
            log::trace!("[Sync] Dropped inbound message: {:?}", reason);
            self.stats.dropped += 1;
            return InboundOutcome::Dropped(reason);
        }

        let InboundEnvelope { user_id, event } = envelope;
        let result = {
            let _scope = self.guard.engage();
            self.apply_event(user_id, event)
        };

        match result {
            Ok(work) => {
                self.stats.applied += 1;
                HostWork::run_all(work, self.host.as_mut());
                InboundOutcome::Applied
            }
            Err(e) => {
                self.stats.failed += 1;
                log::warn!("[Sync] {}", e);
                InboundOutcome::Failed(e)
            }
        }
    }

    fn drop_reason(&self, envelope: &InboundEnvelope) -> Option<DropReason> {
        if self.guard.is_engaged() {
            return Some(DropReason::EchoGuardEngaged);
        }
        let Some(session) = &self.session else {
            return Some(DropReason::SessionUnbound);
        };
        if self.paused {
            return Some(DropReason::Paused);
        }
        if envelope.user_id.as_ref() == Some(&session.identity.user_id) {
            return Some(DropReason::SelfEcho);
        }
        None
    }

    /// Dispatch table. Runs with the echo guard engaged.
    fn apply_event(
        &mut self,
        sender: Option<UserId>,
        event: ServerEvent,
    ) -> SyncResult<Vec<HostWork>> {
        let mut work = Vec::new();

        match event {
            // ─── presence ──────────────────────────────────────────────────
            ServerEvent::UserJoined { username } => {
                let user_id = require_sender(sender, "user_joined")?;
                log::info!("[Sync] {} joined", username);
                self.presence.user_joined(user_id.clone(), username.clone());
                self.events.push(SessionEvent::UserJoined { user_id, username });
            }
            ServerEvent::UserLeft => {
                let user_id = require_sender(sender, "user_left")?;
                let released = self.locks.release_all_for_user(&user_id);
                self.presence.user_left(&user_id);
                log::info!("[Sync] {} left, released {} leases", user_id, released.len());
                self.events.push(SessionEvent::UserLeft { user_id, released });
            }
            ServerEvent::SelectionChanged {
                selected_region_ids,
                ..
            } => {
                let user_id = require_sender(sender, "selection_changed")?;
                if let Some(region_ids) = selected_region_ids {
                    self.presence.set_selection(user_id, region_ids);
                }
            }
            ServerEvent::RecordingPreview { preview } => {
                let user_id = require_sender(sender, "recording_preview")?;
                self.presence.set_recording_preview(user_id, Some(preview));
            }
            ServerEvent::RecordingPreviewEnd => {
                let user_id = require_sender(sender, "recording_preview_end")?;
                self.presence.set_recording_preview(user_id, None);
            }

            // ─── snapshots ─────────────────────────────────────────────────
            ServerEvent::StateSync(sync) => {
                let solicited = std::mem::take(&mut self.awaiting_snapshot);
                if !solicited {
                    log::debug!("[Sync] Applying unsolicited state_sync");
                }
                let tracks = sync.tracks.len();
                work = snapshot::apply_state_sync(
                    &mut self.document,
                    &mut self.locks,
                    &mut self.presence,
                    sync,
                );
                log::info!("[Sync] Snapshot applied ({} tracks)", tracks);
                self.events
                    .push(SessionEvent::SnapshotApplied { tracks, solicited });
            }
            ServerEvent::FullStateUpdate { state } => {
                snapshot::apply_full_state(&mut self.document, state);
                self.events.push(SessionEvent::FullStateApplied);
            }
            ServerEvent::ProjectLoaded { project } => {
                work = snapshot::apply_project(&mut self.document, project);
                self.events.push(SessionEvent::ProjectLoaded { by: sender });
            }

            // ─── tracks ────────────────────────────────────────────────────
            ServerEvent::TrackAdded { track } => self.document.add_track(track),
            ServerEvent::TrackUpdated { track_id, updates } => {
                self.document.update_track(&track_id, &updates)?
            }
            ServerEvent::TrackDeleted { track_id } => {
                let cascaded: Vec<RegionId> = self
                    .document
                    .regions
                    .iter()
                    .filter(|(_, region)| region.track_id == track_id)
                    .map(|(id, _)| id.clone())
                    .collect();
                self.document.remove_track(&track_id)?;
                self.batchers.purge_track(&track_id);
                for region_id in &cascaded {
                    self.batchers.purge_region(region_id);
                }
            }
            ServerEvent::TrackReordered { track_ids } => self.document.reorder_tracks(&track_ids),
            ServerEvent::TrackInstrumentChanged {
                track_id,
                instrument_id,
                instrument_category,
            } => {
                let instrument = InstrumentRef {
                    instrument_id,
                    instrument_category,
                };
                self.document.set_instrument(&track_id, instrument.clone())?;
                work.push(HostWork::InstrumentChanged {
                    track_id,
                    instrument,
                });
            }

            // ─── regions ───────────────────────────────────────────────────
            ServerEvent::RegionAdded { region } => self.document.add_region(region)?,
            ServerEvent::RegionUpdated { region_id, updates } => {
                self.document.update_region(&region_id, &updates)?
            }
            ServerEvent::RegionMoved {
                region_id,
                delta_beats,
            } => self.document.move_region(&region_id, delta_beats)?,
            ServerEvent::RegionDragged { updates } => {
                let mut first_error = None;
                for drag in updates {
                    let update = RegionUpdate {
                        start: Some(drag.new_start),
                        track_id: drag.track_id,
                        ..Default::default()
                    };
                    if let Err(e) = self.document.update_region(&drag.region_id, &update) {
                        first_error.get_or_insert(e);
                    }
                }
                if let Some(e) = first_error {
                    return Err(e.into());
                }
            }
            ServerEvent::RegionDeleted { region_id } => {
                self.document.remove_region(&region_id)?;
                self.batchers.purge_region(&region_id);
            }

            // ─── notes ─────────────────────────────────────────────────────
            ServerEvent::NoteAdded { region_id, note } => {
                self.document.add_note(&region_id, note)?
            }
            ServerEvent::NoteUpdated {
                region_id,
                note_id,
                updates,
            } => self
                .document
                .update_note(&region_id, &note_id, &updates.clamped())?,
            ServerEvent::NoteDeleted { region_id, note_id } => {
                self.document.remove_note(&region_id, &note_id)?;
                self.batchers.note_realtime.remove(&note_id);
            }

            // ─── instruments & effects ─────────────────────────────────────
            ServerEvent::EffectChainUpdated {
                track_id,
                chain_type,
                mut effect_chain,
            } => {
                effect_chain.track_id = track_id;
                effect_chain.chain_type = chain_type;
                self.document.set_effect_chain(effect_chain);
            }
            ServerEvent::SynthParamsUpdated { track_id, params } => {
                self.document.merge_synth_params(&track_id, params.clone());
                work.push(HostWork::ApplyParams { track_id, params });
            }

            // ─── project settings ──────────────────────────────────────────
            ServerEvent::BpmChanged { bpm } => self.document.set_bpm(bpm),
            ServerEvent::TimeSignatureChanged { time_signature } => {
                self.document.set_time_signature(time_signature)?
            }
            ServerEvent::ProjectScaleChanged { project_scale } => {
                self.document.set_project_scale(project_scale)
            }

            // ─── leases ────────────────────────────────────────────────────
            ServerEvent::LockAcquired {
                element_id,
                lease_info,
            } => {
                self.locks.force_acquire(element_id, lease_info);
            }
            ServerEvent::LockReleased { element_id } => {
                let released = match &sender {
                    Some(user_id) => self.locks.release_lock(&element_id, user_id),
                    None => self.locks.force_release(&element_id).is_some(),
                };
                if !released {
                    log::debug!("[Locks] Ignoring release of {} by non-holder", element_id);
                }
            }
            ServerEvent::LockConflict {
                element_id,
                locked_by,
            } => {
                // Informational only; the lease table is left as is
                self.stats.lock_conflicts += 1;
                log::info!("[Locks] Conflict on {}", element_id);
                self.events.push(SessionEvent::LockConflict {
                    element_id,
                    locked_by,
                });
            }

            // ─── markers ───────────────────────────────────────────────────
            ServerEvent::MarkerAdded { marker } => self.document.add_marker(marker),
            ServerEvent::MarkerUpdated { marker_id, updates } => self
                .document
                .update_marker(&marker_id, &updates.clamped())?,
            ServerEvent::MarkerDeleted { marker_id } => {
                self.document.remove_marker(&marker_id)?;
                self.batchers.marker.remove(&marker_id);
            }
        }

        Ok(work)
    }
}

fn require_sender(sender: Option<UserId>, event: &'static str) -> SyncResult<UserId> {
    sender.ok_or(SyncError::MissingSender(event))
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        if self.session.is_some() {
            self.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_connector::ConnectorError;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<ClientEvent>>>);

    impl Transport for Sink {
        fn emit(&mut self, envelope: OutboundEnvelope) -> Result<(), ConnectorError> {
            self.0.lock().push(envelope.event);
            Ok(())
        }
    }

    struct Broken;

    impl Transport for Broken {
        fn emit(&mut self, _: OutboundEnvelope) -> Result<(), ConnectorError> {
            Err(ConnectorError::SendFailed)
        }
    }

    fn bound() -> (SyncCoordinator, Sink) {
        let sink = Sink::default();
        let mut sync = SyncCoordinator::new(&BatchIntervals::default());
        sync.initialize(
            Box::new(sink.clone()),
            RoomId::new("room"),
            UserId::new("me"),
            "Me",
        );
        (sync, sink)
    }

    #[test]
    fn test_unbound_sync_is_silent() {
        let mut sync = SyncCoordinator::new(&BatchIntervals::default());
        sync.sync_bpm(100.0);
        sync.sync_track_update(&TrackId::new("T1"), TrackUpdate::volume(0.2));
        assert!(sync.next_deadline().is_none());
        assert!(!sync.request_snapshot());
        assert!(!sync.acquire_lock("track_T1", LeaseType::Track));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (mut sync, sink) = bound();
        sync.initialize(Box::new(Broken), RoomId::new("room"), UserId::new("me"), "Me");
        sync.sync_bpm(100.0);
        // Still the first transport
        assert_eq!(sink.0.lock().len(), 1);
    }

    #[test]
    fn test_new_identity_tears_down_first() {
        let (mut sync, sink) = bound();
        assert!(sync.acquire_lock("track_T1", LeaseType::Track));
        sync.initialize(Box::new(Broken), RoomId::new("other"), UserId::new("me"), "Me");
        assert!(sync.locks().is_empty());
        assert_eq!(
            sink.0.lock().last(),
            Some(&ClientEvent::LockRelease {
                element_id: "track_T1".into()
            })
        );
        assert_eq!(sync.identity().unwrap().room_id, RoomId::new("other"));
    }

    #[test]
    fn test_send_errors_are_counted_not_raised() {
        let mut sync = SyncCoordinator::new(&BatchIntervals::default());
        sync.initialize(Box::new(Broken), RoomId::new("room"), UserId::new("me"), "Me");
        sync.sync_bpm(90.0);
        assert_eq!(sync.stats().send_errors, 1);
        assert_eq!(sync.stats().emitted, 0);
    }

    #[test]
    fn test_sync_is_silent_under_guard() {
        let (mut sync, sink) = bound();
        let guard = sync.echo_guard().clone();
        {
            let _scope = guard.engage();
            sync.sync_bpm(100.0);
            sync.sync_marker_delete(&MarkerId::new("M1"));
        }
        assert!(sink.0.lock().is_empty());
    }

    #[test]
    fn test_missing_sender_fails_without_crashing() {
        let (mut sync, _) = bound();
        let outcome = sync.handle_inbound(InboundEnvelope::from_relay(ServerEvent::UserLeft));
        assert!(matches!(
            outcome,
            InboundOutcome::Failed(SyncError::MissingSender("user_left"))
        ));
        assert!(!sync.echo_guard().is_engaged());
    }
}
