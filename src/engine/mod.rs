pub mod ndjson;
pub mod ollama;

use crate::config::EngineConfig;
use crate::error::{CuratorError, Result};
use crate::models::{ModelCategory, ModelInfo};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;

pub use ollama::OllamaEngine;

/// Download progress fractions in `[0.0, 1.0]`
pub type ProgressStream = BoxStream<'static, Result<f32>>;

/// Generated text fragments in emission order
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Unified interface for on-device inference engines
///
/// Implementations own model weights, tokenization and the runtime; callers
/// only see ids, progress values and text fragments.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Bootstrap the engine runtime
    async fn initialize(&self, config: &EngineConfig) -> Result<()>;

    /// Register the execution provider used for text generation
    async fn register_provider(&self) -> Result<()>;

    /// Discover models already present on local storage
    async fn scan_for_downloaded_models(&self) -> Result<()>;

    /// All models known to the engine, catalog and local
    async fn list_available_models(&self) -> Result<Vec<ModelInfo>>;

    /// Register a catalog model the engine can later download
    async fn add_model_from_url(
        &self,
        url: &str,
        name: &str,
        category: ModelCategory,
    ) -> Result<ModelInfo>;

    /// Start downloading a model, yielding progress fractions
    async fn download_model(&self, model_id: &str) -> Result<ProgressStream>;

    /// Load a model into memory; `Ok(false)` when the engine refuses it
    async fn load_model(&self, model_id: &str) -> Result<bool>;

    /// Release the loaded model, if any
    async fn unload_model(&self) -> Result<()>;

    /// Stream text fragments for a prompt against the loaded model
    async fn generate_stream(&self, prompt: &str) -> Result<TokenStream>;

    /// Get engine name for logging/debugging
    fn engine_name(&self) -> &str;
}

/// Create engine from config
pub fn from_config(config: &EngineConfig) -> Result<Arc<dyn InferenceEngine>> {
    match config.backend.as_str() {
        "ollama" => Ok(Arc::new(OllamaEngine::new(config)?)),
        _ => Err(CuratorError::Config(format!(
            "Unknown engine backend: {}. Must be 'ollama'",
            config.backend
        ))),
    }
}
