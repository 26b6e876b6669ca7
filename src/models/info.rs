use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of model as registered with the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelCategory {
    #[default]
    Language,
    Vision,
    Multimodal,
    Embedding,
}

impl fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Language => "language",
            Self::Vision => "vision",
            Self::Multimodal => "multimodal",
            Self::Embedding => "embedding",
        };
        f.pad(label)
    }
}

/// Snapshot of a model known to the inference engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub category: ModelCategory,
    pub is_downloaded: bool,
}
