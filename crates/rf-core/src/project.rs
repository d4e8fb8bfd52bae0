//! Project-wide settings: tempo, meter and scale

use serde::{Deserialize, Serialize};

/// Tempo bounds
pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 999.0;

/// Time signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Numerator (beats per bar)
    pub numerator: u8,
    /// Denominator (note value that gets one beat)
    pub denominator: u8,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::COMMON
    }
}

impl TimeSignature {
    pub fn new(numerator: u8, denominator: u8) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Common time (4/4)
    pub const COMMON: Self = Self {
        numerator: 4,
        denominator: 4,
    };

    /// Numerator > 0 and denominator a power of two
    pub fn is_valid(&self) -> bool {
        self.numerator > 0 && self.denominator > 0 && self.denominator.is_power_of_two()
    }
}

/// Scale mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    #[default]
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
    Chromatic,
}

/// Project key/scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectScale {
    /// Root pitch class (0 = C ... 11 = B)
    pub root: u8,
    pub mode: ScaleMode,
}

impl ProjectScale {
    pub fn new(root: u8, mode: ScaleMode) -> Self {
        Self {
            root: root % 12,
            mode,
        }
    }
}

/// Scalar project settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettings {
    pub bpm: f64,
    pub time_signature: TimeSignature,
    pub project_scale: ProjectScale,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            time_signature: TimeSignature::COMMON,
            project_scale: ProjectScale::default(),
        }
    }
}

/// Clamp a tempo into the supported range
pub fn clamp_bpm(bpm: f64) -> f64 {
    if bpm.is_finite() {
        bpm.clamp(MIN_BPM, MAX_BPM)
    } else {
        ProjectSettings::default().bpm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_signature_validity() {
        assert!(TimeSignature::new(7, 8).is_valid());
        assert!(!TimeSignature::new(4, 3).is_valid());
        assert!(!TimeSignature::new(0, 4).is_valid());
    }

    #[test]
    fn test_clamp_bpm() {
        assert_eq!(clamp_bpm(5.0), MIN_BPM);
        assert_eq!(clamp_bpm(128.0), 128.0);
        assert_eq!(clamp_bpm(f64::NAN), 120.0);
    }

    #[test]
    fn test_scale_root_wraps() {
        let scale = ProjectScale::new(14, ScaleMode::Minor);
        assert_eq!(scale.root, 2);
    }
}
