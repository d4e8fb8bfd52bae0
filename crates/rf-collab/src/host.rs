//! Live instrument seam
//!
//! The sync layer never touches audio. When remote parameters or instrument
//! assignments arrive it hands them to an [`InstrumentHost`] after the
//! document has been updated.

use rf_core::{InstrumentRef, SynthState, TrackId};

/// Whatever runs the live instruments
pub trait InstrumentHost: Send {
    /// Apply parameters to the instrument on `track_id`
    fn apply_params(&mut self, track_id: &TrackId, params: &SynthState) -> Result<(), String>;

    /// The instrument loaded on `track_id` changed
    fn instrument_changed(
        &mut self,
        track_id: &TrackId,
        instrument: &InstrumentRef,
    ) -> Result<(), String>;
}

/// Host that only logs (headless sessions)
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHost;

impl InstrumentHost for NullHost {
    fn apply_params(&mut self, track_id: &TrackId, params: &SynthState) -> Result<(), String> {
        log::trace!("[Host] {} params on {}", params.params.len(), track_id);
        Ok(())
    }

    fn instrument_changed(
        &mut self,
        track_id: &TrackId,
        instrument: &InstrumentRef,
    ) -> Result<(), String> {
        log::trace!("[Host] {} now plays {}", track_id, instrument.instrument_id);
        Ok(())
    }
}

/// Deferred host call, run after the echo guard is released
#[derive(Debug, Clone, PartialEq)]
pub enum HostWork {
    ApplyParams {
        track_id: TrackId,
        params: SynthState,
    },
    InstrumentChanged {
        track_id: TrackId,
        instrument: InstrumentRef,
    },
}

impl HostWork {
    /// Run against `host`; failures are logged and skipped
    pub fn run_all(work: Vec<HostWork>, host: &mut dyn InstrumentHost) -> usize {
        let mut failures = 0;
        for item in work {
            let (track_id, result) = match &item {
                HostWork::ApplyParams { track_id, params } => {
                    (track_id, host.apply_params(track_id, params))
                }
                HostWork::InstrumentChanged {
                    track_id,
                    instrument,
                } => (track_id, host.instrument_changed(track_id, instrument)),
            };
            if let Err(reason) = result {
                failures += 1;
                log::warn!(
                    "[Sync] {}",
                    crate::SyncError::Instrument {
                        track_id: track_id.clone(),
                        reason,
                    }
                );
            }
        }
        failures
    }
}
