//! Snapshot reconciliation
//!
//! Snapshots are always applied as destructive replaces, never merged, and
//! in dependency order:
//!
//! ```text
//! tracks → regions → markers → effect chains → synth states → settings → locks → presence
//! ```
//!
//! The caller holds the echo guard for the whole apply. Live instruments are
//! only touched afterwards, from the returned [`HostWork`].

use rf_connector::{FullState, StateSync};
use rf_core::{ProjectSettings, SynthState, TimeSignature, TrackId, clamp_bpm};
use rf_state::{Document, LockManager, Presence, Selection};
use std::collections::BTreeMap;

use crate::HostWork;

/// Replace the whole room state
pub fn apply_state_sync(
    document: &mut Document,
    locks: &mut LockManager,
    presence: &mut Presence,
    sync: StateSync,
) -> Vec<HostWork> {
    let StateSync {
        tracks,
        regions,
        locks: leases,
        selected_track_id,
        selected_region_ids,
        bpm,
        time_signature,
        project_scale,
        synth_states,
        effect_chains,
        markers,
        voice_states,
        broadcast_states,
    } = sync;

    document.replace_tracks(tracks);
    document.replace_regions(regions);
    document.replace_markers(markers);
    document.replace_effect_chains(effect_chains);

    let work = synth_work(&synth_states);
    document.replace_synth_states(synth_states);

    let defaults = ProjectSettings::default();
    document.replace_settings(ProjectSettings {
        bpm: bpm.map(clamp_bpm).unwrap_or(defaults.bpm),
        time_signature: valid_time_signature(time_signature).unwrap_or(defaults.time_signature),
        project_scale: project_scale.unwrap_or(defaults.project_scale),
    });

    locks.replace_all(leases);
    presence.replace_aux(
        voice_states,
        broadcast_states,
        Selection {
            track_id: selected_track_id,
            region_ids: selected_region_ids,
        },
    );

    work
}

/// Whole-project replace (`project_loaded`); locks and presence stay
pub fn apply_project(document: &mut Document, project: StateSync) -> Vec<HostWork> {
    document.replace_tracks(project.tracks);
    document.replace_regions(project.regions);
    document.replace_markers(project.markers);
    document.replace_effect_chains(project.effect_chains);

    let work = synth_work(&project.synth_states);
    document.replace_synth_states(project.synth_states);

    let mut settings = *document.settings.get();
    if let Some(bpm) = project.bpm {
        settings.bpm = clamp_bpm(bpm);
    }
    if let Some(ts) = valid_time_signature(project.time_signature) {
        settings.time_signature = ts;
    }
    if let Some(scale) = project.project_scale {
        settings.project_scale = scale;
    }
    document.replace_settings(settings);

    work
}

/// Broadcast rewrite: replace only what the message carries
pub fn apply_full_state(document: &mut Document, state: FullState) {
    if let Some(tracks) = state.tracks {
        document.replace_tracks(tracks);
    }
    if let Some(regions) = state.regions {
        document.replace_regions(regions);
    }
    if let Some(markers) = state.markers {
        document.replace_markers(markers);
    }
    if state.bpm.is_some() || state.time_signature.is_some() {
        let mut settings = *document.settings.get();
        if let Some(bpm) = state.bpm {
            settings.bpm = clamp_bpm(bpm);
        }
        if let Some(ts) = valid_time_signature(state.time_signature) {
            settings.time_signature = ts;
        }
        document.replace_settings(settings);
    }
}

/// The parts of the document a full-state rewrite carries
pub fn capture_full_state(document: &Document) -> FullState {
    let settings = document.settings.get();
    FullState {
        tracks: Some(document.tracks.to_vec()),
        regions: Some(document.regions.values().map(|r| r.sanitized()).collect()),
        markers: Some(document.markers.to_vec()),
        bpm: Some(settings.bpm),
        time_signature: Some(settings.time_signature),
    }
}

/// Complete snapshot of the local view, in wire form
pub fn capture_state_sync(
    document: &Document,
    locks: &LockManager,
    presence: &Presence,
) -> StateSync {
    let state = document.state();
    StateSync {
        tracks: state.tracks,
        regions: state.regions.iter().map(|r| r.sanitized()).collect(),
        locks: locks.leases().clone(),
        selected_track_id: presence.snapshot_selection.track_id.clone(),
        selected_region_ids: presence.snapshot_selection.region_ids.clone(),
        bpm: Some(state.settings.bpm),
        time_signature: Some(state.settings.time_signature),
        project_scale: Some(state.settings.project_scale),
        synth_states: state.synth_states,
        effect_chains: state.effect_chains,
        markers: state.markers,
        voice_states: presence.voice_states.clone(),
        broadcast_states: presence.broadcast_states.clone(),
    }
}

fn synth_work(states: &BTreeMap<TrackId, SynthState>) -> Vec<HostWork> {
    states
        .iter()
        .filter(|(_, state)| !state.is_empty())
        .map(|(track_id, params)| HostWork::ApplyParams {
            track_id: track_id.clone(),
            params: params.clone(),
        })
        .collect()
}

fn valid_time_signature(ts: Option<TimeSignature>) -> Option<TimeSignature> {
    match ts {
        Some(ts) if ts.is_valid() => Some(ts),
        Some(ts) => {
            log::warn!(
                "[Sync] Ignoring invalid time signature {}/{}",
                ts.numerator,
                ts.denominator
            );
            None
        }
        None => None,
    }
}
