use crate::config::Config;
use crate::models::ModelCategory;
use serde::{Deserialize, Serialize};

/// A model the application knows how to fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Explicit id; derived from `url` when absent
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    /// Source URL or registry reference understood by the engine
    pub url: String,
    #[serde(default)]
    pub category: ModelCategory,
}

impl CatalogEntry {
    /// Id the engine will report for this entry
    #[must_use]
    pub fn model_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| reference_id(&self.url))
    }
}

struct BuiltinModel {
    name: &'static str,
    url: &'static str,
    category: ModelCategory,
}

/// Models registered when the config does not list its own
const BUILTIN_MODELS: &[BuiltinModel] = &[
    BuiltinModel {
        name: "SmolLM2 360M Instruct",
        url: "https://huggingface.co/bartowski/SmolLM2-360M-Instruct-GGUF:Q8_0",
        category: ModelCategory::Language,
    },
    BuiltinModel {
        name: "Qwen2.5 0.5B Instruct",
        url: "qwen2.5:0.5b-instruct",
        category: ModelCategory::Language,
    },
    BuiltinModel {
        name: "Llama 3.2 1B Instruct",
        url: "llama3.2:1b",
        category: ModelCategory::Language,
    },
    BuiltinModel {
        name: "Moondream 2",
        url: "moondream:1.8b",
        category: ModelCategory::Vision,
    },
];

/// Catalog of known models fed to the engine at startup
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    entries: Vec<CatalogEntry>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Registry with the built-in catalog
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(
            BUILTIN_MODELS
                .iter()
                .map(|m| CatalogEntry {
                    id: None,
                    name: m.name.to_string(),
                    url: m.url.to_string(),
                    category: m.category,
                })
                .collect(),
        )
    }

    /// Configured catalog, or the built-in one when config lists none
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        if config.models.is_empty() {
            Self::builtin()
        } else {
            Self::new(config.models.clone())
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Find entry by model id
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.model_id() == id)
    }

    /// Get all model ids
    #[must_use]
    pub fn all_ids(&self) -> Vec<String> {
        self.entries.iter().map(CatalogEntry::model_id).collect()
    }

    /// Find closest id using Levenshtein distance
    #[must_use]
    pub fn suggest(&self, id: &str) -> Option<String> {
        if id.is_empty() {
            return None;
        }

        self.all_ids()
            .into_iter()
            .map(|candidate| {
                let dist = levenshtein_distance(id, &candidate);
                (candidate, dist)
            })
            .min_by_key(|(_, dist)| *dist)
            .filter(|(_, dist)| *dist <= 2) // Only suggest if within 2 edits
            .map(|(candidate, _)| candidate)
    }
}

/// Normalize a source URL or reference into the id the engine reports.
///
/// Hugging Face URLs become `hf.co/` references and untagged references
/// get the implicit `:latest` tag.
#[must_use]
pub fn reference_id(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let reference = trimmed
        .strip_prefix("https://huggingface.co/")
        .or_else(|| trimmed.strip_prefix("http://huggingface.co/"))
        .map_or_else(|| trimmed.to_string(), |rest| format!("hf.co/{rest}"));

    let last_segment = reference.rsplit('/').next().unwrap_or(reference.as_str());
    if last_segment.contains(':') {
        reference
    } else {
        format!("{reference}:latest")
    }
}

/// Calculate Levenshtein distance between two strings
fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();

    if s1_chars.is_empty() {
        return s2_chars.len();
    }
    if s2_chars.is_empty() {
        return s1_chars.len();
    }

    let mut prev: Vec<usize> = (0..=s2_chars.len()).collect();
    let mut curr = vec![0; s2_chars.len() + 1];

    for (i, c1) in s1_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, c2) in s2_chars.iter().enumerate() {
            let cost = usize::from(c1 != c2);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[s2_chars.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_ids() {
        let registry = ModelRegistry::builtin();
        let ids = registry.all_ids();
        assert_eq!(ids.len(), 4);
        assert!(ids.contains(&"hf.co/bartowski/SmolLM2-360M-Instruct-GGUF:Q8_0".to_string()));
        assert!(ids.contains(&"qwen2.5:0.5b-instruct".to_string()));
        assert!(ids.contains(&"llama3.2:1b".to_string()));
    }

    #[test]
    fn test_find_model() {
        let registry = ModelRegistry::builtin();
        let found = registry.find("llama3.2:1b").unwrap();
        assert_eq!(found.name, "Llama 3.2 1B Instruct");
        assert!(registry.find("invalid").is_none());
    }

    #[test]
    fn test_from_config_prefers_configured_models() {
        let mut config = Config::default();
        assert_eq!(ModelRegistry::from_config(&config).entries().len(), 4);

        config.models.push(CatalogEntry {
            id: Some("custom".to_string()),
            name: "Custom".to_string(),
            url: "custom-model".to_string(),
            category: ModelCategory::Multimodal,
        });
        let registry = ModelRegistry::from_config(&config);
        assert_eq!(registry.all_ids(), vec!["custom".to_string()]);
    }

    #[test]
    fn test_reference_id() {
        assert_eq!(reference_id("llama3.2"), "llama3.2:latest");
        assert_eq!(reference_id("llama3.2:1b"), "llama3.2:1b");
        assert_eq!(
            reference_id("https://huggingface.co/bartowski/SmolLM2-360M-Instruct-GGUF"),
            "hf.co/bartowski/SmolLM2-360M-Instruct-GGUF:latest"
        );
        assert_eq!(
            reference_id(" https://huggingface.co/org/repo:Q4_K_M/ "),
            "hf.co/org/repo:Q4_K_M"
        );
        assert_eq!(reference_id("localhost:5000/model"), "localhost:5000/model:latest");
    }

    #[test]
    fn test_suggest() {
        let registry = ModelRegistry::builtin();
        assert_eq!(registry.suggest("llama3.2:1"), Some("llama3.2:1b".to_string()));
        assert_eq!(
            registry.suggest("moondream:1.9b"),
            Some("moondream:1.8b".to_string())
        );
        assert_eq!(registry.suggest("totally-different"), None);
        assert_eq!(registry.suggest(""), None);
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("base", "base"), 0);
        assert_eq!(levenshtein_distance("base", "basee"), 1);
        assert_eq!(levenshtein_distance("base", "bse"), 1);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }
}
