//! Timeline markers

use serde::{Deserialize, Serialize};

use crate::MarkerId;

/// Default marker color (blue)
pub const DEFAULT_MARKER_COLOR: u32 = 0x4a9eff;

/// A named position on the timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub id: MarkerId,
    /// Position in beats
    pub position: f64,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_color")]
    pub color: u32,
}

fn default_color() -> u32 {
    DEFAULT_MARKER_COLOR
}

impl Marker {
    pub fn new(id: MarkerId, position: f64, label: impl Into<String>) -> Self {
        Self {
            id,
            position: position.max(0.0),
            label: label.into(),
            color: DEFAULT_MARKER_COLOR,
        }
    }

    pub fn apply(&mut self, update: &MarkerUpdate) {
        if let Some(position) = update.position {
            self.position = position.max(0.0);
        }
        if let Some(label) = &update.label {
            self.label = label.clone();
        }
        if let Some(color) = update.color {
            self.color = color;
        }
    }
}

/// Partial marker update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
}

impl MarkerUpdate {
    pub fn merge(&mut self, newer: MarkerUpdate) {
        if newer.position.is_some() {
            self.position = newer.position;
        }
        if newer.label.is_some() {
            self.label = newer.label;
        }
        if newer.color.is_some() {
            self.color = newer.color;
        }
    }

    pub fn clamped(mut self) -> Self {
        self.position = self.position.map(|p| p.max(0.0));
        self
    }
}

/// Sort markers by timeline position
pub fn sort_by_position(markers: &mut [Marker]) {
    markers.sort_by(|a, b| a.position.total_cmp(&b.position));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_update() {
        let mut marker = Marker::new(MarkerId::new("m1"), 8.0, "Verse");
        marker.apply(&MarkerUpdate {
            position: Some(-1.0),
            label: Some("Intro".into()),
            ..Default::default()
        });
        assert_eq!(marker.position, 0.0);
        assert_eq!(marker.label, "Intro");
        assert_eq!(marker.color, DEFAULT_MARKER_COLOR);
    }

    #[test]
    fn test_sort_by_position() {
        let mut markers = vec![
            Marker::new(MarkerId::new("b"), 16.0, "Chorus"),
            Marker::new(MarkerId::new("a"), 4.0, "Verse"),
        ];
        sort_by_position(&mut markers);
        assert_eq!(markers[0].label, "Verse");
    }
}
