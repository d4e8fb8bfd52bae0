//! Effect chains and instrument parameters

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::TrackId;

/// Effect instance inside a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectInstance {
    pub id: String,
    /// Effect kind (eq, compressor, reverb...)
    pub kind: String,
    #[serde(default)]
    pub bypass: bool,
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
}

impl EffectInstance {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            bypass: false,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }
}

/// Key of an effect chain: owning track (or bus id) plus chain type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainKey {
    pub track_id: TrackId,
    pub chain_type: String,
}

impl ChainKey {
    pub fn new(track_id: TrackId, chain_type: impl Into<String>) -> Self {
        Self {
            track_id,
            chain_type: chain_type.into(),
        }
    }
}

/// Ordered effect chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectChain {
    pub track_id: TrackId,
    pub chain_type: String,
    #[serde(default)]
    pub effects: Vec<EffectInstance>,
}

impl EffectChain {
    pub fn new(track_id: TrackId, chain_type: impl Into<String>) -> Self {
        Self {
            track_id,
            chain_type: chain_type.into(),
            effects: Vec::new(),
        }
    }

    pub fn key(&self) -> ChainKey {
        ChainKey::new(self.track_id.clone(), self.chain_type.clone())
    }
}

/// Instrument parameter set of one track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SynthState {
    pub params: BTreeMap<String, f64>,
}

impl SynthState {
    pub fn from_params<I, S>(params: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            params: params.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Per-parameter merge: values in `newer` overwrite
    pub fn merge(&mut self, newer: SynthState) {
        self.params.extend(newer.params);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.params.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}
