use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// One detector output for one object in one frame.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    /// Role the detector label maps to.
    pub class: ObjectClass,
    /// Raw class name as reported by the detector.
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Tracker identifier. Only trackable classes carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u32>,
}

impl Detection {
    pub fn new(class: ObjectClass, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class,
            label: class.as_str().to_string(),
            confidence,
            bbox,
            track_id: None,
        }
    }

    pub fn with_track_id(mut self, track_id: u32) -> Self {
        self.track_id = Some(track_id);
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Structural sanity check applied before a detection is classified.
    pub fn is_well_formed(&self) -> bool {
        self.confidence.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
            && self.bbox.is_well_formed()
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    Hand,
    Utensil,
    Food,
    Background,
}

impl ObjectClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectClass::Hand => "hand",
            ObjectClass::Utensil => "utensil",
            ObjectClass::Food => "food",
            ObjectClass::Background => "background_object",
        }
    }
}
