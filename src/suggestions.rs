//! Structured results the gallery features ask models for
//!
//! All types decode from camelCase JSON, typically through
//! [`GenerationPipeline::generate_json`](crate::generation::GenerationPipeline::generate_json).

use serde::{Deserialize, Serialize};

/// Mood preset proposed for a set of images
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodPresetSuggestion {
    pub title: String,
    pub description: String,
    /// Hex color such as `#1E90FF`
    pub primary_color: String,
    pub secondary_color: String,
}

/// Suggested presentation order for a set of images
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSequencePlan {
    pub ordered_image_ids: Vec<String>,
    #[serde(default)]
    pub rationale: Vec<String>,
}

/// Scored critique of a single image; scores range over `0..=100`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CritiqueReport {
    pub overall_score: u8,
    pub composition_score: u8,
    pub emotion_score: u8,
    pub storytelling_score: u8,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl CritiqueReport {
    /// Whether every score lies within `0..=100`
    #[must_use]
    pub fn scores_in_range(&self) -> bool {
        [
            self.overall_score,
            self.composition_score,
            self.emotion_score,
            self.storytelling_score,
        ]
        .iter()
        .all(|score| *score <= 100)
    }
}
