//! Document aggregate
//!
//! One arrangement = one `Document`: a store per entity kind plus the local
//! selection. The methods here keep cross-store references consistent (a
//! region's track must exist and lists the region; deleting a track takes
//! its regions, effect chains and instrument state with it).

use rf_core::{
    ChainKey, EffectChain, InstrumentRef, Marker, MarkerId, MarkerUpdate, Note, NoteId,
    NoteUpdate, ProjectScale, ProjectSettings, Region, RegionId, RegionUpdate, RfError, RfResult,
    SynthState, TimeSignature, Track, TrackId, TrackUpdate, clamp_bpm,
};
use std::collections::BTreeMap;

use crate::{EntityStore, ValueStore};

/// Local selection (never synchronized into other participants' documents)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub track_id: Option<TrackId>,
    pub region_ids: Vec<RegionId>,
}

/// Plain-data copy of a document, comparable and cheap to reason about
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentState {
    pub tracks: Vec<Track>,
    pub regions: Vec<Region>,
    pub markers: Vec<Marker>,
    pub effect_chains: Vec<EffectChain>,
    pub synth_states: BTreeMap<TrackId, SynthState>,
    pub settings: ProjectSettings,
}

/// All entity stores of one arrangement
#[derive(Debug, Default)]
pub struct Document {
    pub tracks: EntityStore<TrackId, Track>,
    pub regions: EntityStore<RegionId, Region>,
    pub markers: EntityStore<MarkerId, Marker>,
    pub effect_chains: EntityStore<ChainKey, EffectChain>,
    pub synth_states: EntityStore<TrackId, SynthState>,
    pub settings: ValueStore<ProjectSettings>,
    pub selection: Selection,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TRACKS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn add_track(&mut self, track: Track) {
        self.tracks.insert(track.id.clone(), track);
    }

    pub fn update_track(&mut self, track_id: &TrackId, update: &TrackUpdate) -> RfResult<()> {
        self.tracks
            .patch(track_id, |track| track.apply(update))
            .ok_or_else(|| RfError::TrackNotFound(track_id.clone()))
    }

    pub fn set_instrument(&mut self, track_id: &TrackId, instrument: InstrumentRef) -> RfResult<()> {
        self.tracks
            .patch(track_id, |track| track.instrument = Some(instrument))
            .ok_or_else(|| RfError::TrackNotFound(track_id.clone()))
    }

    /// Remove a track together with everything that hangs off it
    pub fn remove_track(&mut self, track_id: &TrackId) -> RfResult<Track> {
        let track = self
            .tracks
            .remove(track_id)
            .ok_or_else(|| RfError::TrackNotFound(track_id.clone()))?;
        self.regions.remove_where(|_, region| &region.track_id == track_id);
        self.effect_chains.remove_where(|key, _| &key.track_id == track_id);
        self.synth_states.remove(track_id);
        if self.selection.track_id.as_ref() == Some(track_id) {
            self.selection.track_id = None;
        }
        let regions = &self.regions;
        self.selection.region_ids.retain(|id| regions.contains(id));
        Ok(track)
    }

    pub fn reorder_tracks(&mut self, order: &[TrackId]) {
        self.tracks.reorder(order);
    }

    pub fn track_order(&self) -> Vec<TrackId> {
        self.tracks.keys().cloned().collect()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // REGIONS & NOTES
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert (or overwrite) a region; its track must exist
    pub fn add_region(&mut self, region: Region) -> RfResult<()> {
        let track_id = region.track_id.clone();
        let region_id = region.id.clone();
        if !self.tracks.contains(&track_id) {
            return Err(RfError::TrackNotFound(track_id));
        }
        if let Some(previous) = self.regions.insert(region_id.clone(), region)
            && previous.track_id != track_id
        {
            self.tracks
                .patch(&previous.track_id, |track| track.detach_region(&region_id));
        }
        self.tracks
            .patch(&track_id, |track| track.attach_region(region_id));
        Ok(())
    }

    /// Apply a partial update, re-parenting the region if its track changed
    pub fn update_region(&mut self, region_id: &RegionId, update: &RegionUpdate) -> RfResult<()> {
        let old_track = self
            .regions
            .get(region_id)
            .map(|region| region.track_id.clone())
            .ok_or_else(|| RfError::RegionNotFound(region_id.clone()))?;
        if let Some(new_track) = &update.track_id
            && new_track != &old_track
        {
            if !self.tracks.contains(new_track) {
                return Err(RfError::TrackNotFound(new_track.clone()));
            }
            self.tracks
                .patch(&old_track, |track| track.detach_region(region_id));
            self.tracks
                .patch(new_track, |track| track.attach_region(region_id.clone()));
        }
        self.regions.patch(region_id, |region| region.apply(update));
        Ok(())
    }

    pub fn move_region(&mut self, region_id: &RegionId, delta_beats: f64) -> RfResult<()> {
        self.regions
            .patch(region_id, |region| region.move_by(delta_beats))
            .ok_or_else(|| RfError::RegionNotFound(region_id.clone()))
    }

    pub fn remove_region(&mut self, region_id: &RegionId) -> RfResult<Region> {
        let region = self
            .regions
            .remove(region_id)
            .ok_or_else(|| RfError::RegionNotFound(region_id.clone()))?;
        self.tracks
            .patch(&region.track_id, |track| track.detach_region(region_id));
        self.selection.region_ids.retain(|id| id != region_id);
        Ok(region)
    }

    pub fn add_note(&mut self, region_id: &RegionId, note: Note) -> RfResult<()> {
        self.regions
            .patch(region_id, |region| region.upsert_note(note))
            .ok_or_else(|| RfError::RegionNotFound(region_id.clone()))?
    }

    pub fn update_note(
        &mut self,
        region_id: &RegionId,
        note_id: &NoteId,
        update: &NoteUpdate,
    ) -> RfResult<()> {
        self.regions
            .patch(region_id, |region| region.update_note(note_id, update))
            .ok_or_else(|| RfError::RegionNotFound(region_id.clone()))?
    }

    pub fn remove_note(&mut self, region_id: &RegionId, note_id: &NoteId) -> RfResult<Note> {
        self.regions
            .patch(region_id, |region| region.remove_note(note_id))
            .ok_or_else(|| RfError::RegionNotFound(region_id.clone()))?
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MARKERS, EFFECTS, INSTRUMENTS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn add_marker(&mut self, marker: Marker) {
        self.markers.insert(marker.id.clone(), marker);
    }

    pub fn update_marker(&mut self, marker_id: &MarkerId, update: &MarkerUpdate) -> RfResult<()> {
        self.markers
            .patch(marker_id, |marker| marker.apply(update))
            .ok_or_else(|| RfError::MarkerNotFound(marker_id.clone()))
    }

    pub fn remove_marker(&mut self, marker_id: &MarkerId) -> RfResult<Marker> {
        self.markers
            .remove(marker_id)
            .ok_or_else(|| RfError::MarkerNotFound(marker_id.clone()))
    }

    /// Markers sorted by position
    pub fn markers_sorted(&self) -> Vec<Marker> {
        let mut markers = self.markers.to_vec();
        rf_core::sort_by_position(&mut markers);
        markers
    }

    pub fn set_effect_chain(&mut self, chain: EffectChain) {
        self.effect_chains.insert(chain.key(), chain);
    }

    /// Merge parameters into a track's instrument state
    pub fn merge_synth_params(&mut self, track_id: &TrackId, params: SynthState) {
        if self.synth_states.contains(track_id) {
            self.synth_states
                .patch(track_id, |state| state.merge(params));
        } else {
            self.synth_states.insert(track_id.clone(), params);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SETTINGS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_bpm(&mut self, bpm: f64) {
        self.settings.patch(|s| s.bpm = clamp_bpm(bpm));
    }

    pub fn set_time_signature(&mut self, time_signature: TimeSignature) -> RfResult<()> {
        if !time_signature.is_valid() {
            return Err(RfError::InvalidParam(format!(
                "time signature {}/{}",
                time_signature.numerator, time_signature.denominator
            )));
        }
        self.settings.patch(|s| s.time_signature = time_signature);
        Ok(())
    }

    pub fn set_project_scale(&mut self, scale: ProjectScale) {
        self.settings.patch(|s| s.project_scale = scale);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // WHOLESALE REPLACE (snapshots)
    // ═══════════════════════════════════════════════════════════════════════

    pub fn replace_tracks(&mut self, tracks: Vec<Track>) {
        self.tracks
            .replace_all(tracks.into_iter().map(|t| (t.id.clone(), t)));
        let tracks = &self.tracks;
        if self
            .selection
            .track_id
            .as_ref()
            .is_some_and(|id| !tracks.contains(id))
        {
            self.selection.track_id = None;
        }
    }

    pub fn replace_regions(&mut self, regions: Vec<Region>) {
        self.regions
            .replace_all(regions.into_iter().map(|r| (r.id.clone(), r)));
        let regions = &self.regions;
        self.selection.region_ids.retain(|id| regions.contains(id));
    }

    pub fn replace_markers(&mut self, markers: Vec<Marker>) {
        self.markers
            .replace_all(markers.into_iter().map(|m| (m.id.clone(), m)));
    }

    pub fn replace_effect_chains(&mut self, chains: Vec<EffectChain>) {
        self.effect_chains
            .replace_all(chains.into_iter().map(|c| (c.key(), c)));
    }

    pub fn replace_synth_states(&mut self, states: BTreeMap<TrackId, SynthState>) {
        self.synth_states.replace_all(states);
    }

    pub fn replace_settings(&mut self, settings: ProjectSettings) {
        self.settings.set(settings);
    }

    /// Plain-data copy of the whole document
    pub fn state(&self) -> DocumentState {
        DocumentState {
            tracks: self.tracks.to_vec(),
            regions: self.regions.to_vec(),
            markers: self.markers.to_vec(),
            effect_chains: self.effect_chains.to_vec(),
            synth_states: self
                .synth_states
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            settings: *self.settings.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_core::EffectInstance;

    fn doc_with_track() -> Document {
        let mut doc = Document::new();
        doc.add_track(Track::midi(TrackId::new("T1"), "Keys"));
        doc
    }

    #[test]
    fn test_region_requires_track() {
        let mut doc = Document::new();
        let region = Region::midi(RegionId::new("R1"), TrackId::new("T9"), 0.0, 4.0);
        assert_eq!(
            doc.add_region(region),
            Err(RfError::TrackNotFound(TrackId::new("T9")))
        );
    }

    #[test]
    fn test_add_region_attaches_to_track() {
        let mut doc = doc_with_track();
        doc.add_region(Region::midi(RegionId::new("R1"), TrackId::new("T1"), 0.0, 4.0))
            .unwrap();
        let track = doc.tracks.get(&TrackId::new("T1")).unwrap();
        assert_eq!(track.region_ids, vec![RegionId::new("R1")]);
    }

    #[test]
    fn test_update_region_reparents() {
        let mut doc = doc_with_track();
        doc.add_track(Track::midi(TrackId::new("T2"), "Bass"));
        doc.add_region(Region::midi(RegionId::new("R1"), TrackId::new("T1"), 0.0, 4.0))
            .unwrap();

        let update = RegionUpdate {
            track_id: Some(TrackId::new("T2")),
            start: Some(8.0),
            ..Default::default()
        };
        doc.update_region(&RegionId::new("R1"), &update).unwrap();

        assert!(doc.tracks.get(&TrackId::new("T1")).unwrap().region_ids.is_empty());
        assert_eq!(
            doc.tracks.get(&TrackId::new("T2")).unwrap().region_ids,
            vec![RegionId::new("R1")]
        );
        assert_eq!(doc.regions.get(&RegionId::new("R1")).unwrap().start, 8.0);
    }

    #[test]
    fn test_remove_track_cascades() {
        let mut doc = doc_with_track();
        doc.add_region(Region::midi(RegionId::new("R1"), TrackId::new("T1"), 0.0, 4.0))
            .unwrap();
        let mut chain = EffectChain::new(TrackId::new("T1"), "insert");
        chain.effects.push(EffectInstance::new("fx", "eq"));
        doc.set_effect_chain(chain);
        doc.merge_synth_params(&TrackId::new("T1"), SynthState::from_params([("cutoff", 0.5)]));
        doc.selection.region_ids.push(RegionId::new("R1"));

        doc.remove_track(&TrackId::new("T1")).unwrap();
        assert!(doc.regions.is_empty());
        assert!(doc.effect_chains.is_empty());
        assert!(doc.synth_states.is_empty());
        assert!(doc.selection.region_ids.is_empty());
    }

    #[test]
    fn test_note_on_missing_region() {
        let mut doc = doc_with_track();
        let note = Note::new(NoteId::new("n1"), 60, 100, 0.0, 1.0);
        assert_eq!(
            doc.add_note(&RegionId::new("R1"), note),
            Err(RfError::RegionNotFound(RegionId::new("R1")))
        );
    }

    #[test]
    fn test_settings_validation() {
        let mut doc = Document::new();
        doc.set_bpm(1000.0);
        assert_eq!(doc.settings.get().bpm, rf_core::MAX_BPM);
        assert!(doc.set_time_signature(TimeSignature::new(3, 5)).is_err());
        assert_eq!(doc.settings.get().time_signature, TimeSignature::COMMON);
        doc.set_time_signature(TimeSignature::new(6, 8)).unwrap();
        assert_eq!(doc.settings.get().time_signature, TimeSignature::new(6, 8));
    }

    #[test]
    fn test_replace_is_destructive_and_state_roundtrips() {
        let mut doc = doc_with_track();
        doc.add_track(Track::audio(TrackId::new("T2"), "Vox"));
        doc.selection.track_id = Some(TrackId::new("T2"));

        doc.replace_tracks(vec![Track::audio(TrackId::new("T3"), "Gtr")]);
        assert_eq!(doc.track_order(), vec![TrackId::new("T3")]);
        assert!(doc.selection.track_id.is_none());

        let state = doc.state();
        assert_eq!(state.tracks.len(), 1);
        assert_eq!(state.settings, ProjectSettings::default());
    }
}
