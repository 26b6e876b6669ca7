//! Structured-output generation
//!
//! Drives the engine's token stream for one prompt, aggregates fragments in
//! arrival order, extracts the embedded JSON payload and decodes it with a
//! caller-supplied decoder.

pub mod sanitize;

pub use sanitize::sanitize_response;

use crate::engine::{InferenceEngine, TokenStream};
use crate::error::CuratorError;
use crate::lifecycle::InitializationState;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};

/// Default number of raw characters kept for diagnostics
pub const DEFAULT_EXCERPT_CHARS: usize = 500;

/// Why a generation produced no value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("AI features are disabled")]
    FeatureDisabled,

    #[error("AI features are not initialized (state: {0})")]
    NotInitialized(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Payload decoded to nothing")]
    EmptyDecode,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

/// Failed generation with the start of the raw response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationFailure {
    pub kind: GenerationError,
    pub raw_excerpt: String,
}

impl fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw_excerpt.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}. Raw response: {}", self.kind, self.raw_excerpt)
        }
    }
}

impl std::error::Error for GenerationFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

pub type GenerationResult<T> = std::result::Result<T, GenerationFailure>;

/// Ties a pipeline to a lifecycle manager's flag, state and model lock
#[derive(Debug, Clone)]
pub(crate) struct PipelineGate {
    pub(crate) enabled: bool,
    pub(crate) state: watch::Receiver<InitializationState>,
    pub(crate) model_lock: Arc<RwLock<()>>,
}

/// Turns one prompt into one decoded value
#[derive(Clone)]
pub struct GenerationPipeline {
    engine: Arc<dyn InferenceEngine>,
    excerpt_chars: usize,
    gate: Option<PipelineGate>,
}

impl fmt::Debug for GenerationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationPipeline")
            .field("engine", &self.engine.engine_name())
            .field("excerpt_chars", &self.excerpt_chars)
            .field("gated", &self.gate.is_some())
            .finish()
    }
}

impl GenerationPipeline {
    /// Standalone pipeline; the caller is responsible for having a model loaded
    #[must_use]
    pub fn new(engine: Arc<dyn InferenceEngine>) -> Self {
        Self {
            engine,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
            gate: None,
        }
    }

    #[must_use]
    pub fn with_excerpt_chars(mut self, excerpt_chars: usize) -> Self {
        self.excerpt_chars = excerpt_chars;
        self
    }

    #[must_use]
    pub(crate) fn with_gate(mut self, gate: PipelineGate) -> Self {
        self.gate = Some(gate);
        self
    }

    fn failure(&self, kind: GenerationError, raw: &str) -> GenerationFailure {
        GenerationFailure {
            kind,
            raw_excerpt: excerpt(raw, self.excerpt_chars),
        }
    }

    /// Generate and decode a structured value.
    ///
    /// `decode` receives the sanitized payload. `Ok(None)` means the payload
    /// decoded to nothing; `Err` means it was malformed. No retries and no
    /// timeout: a stalled stream waits until the caller gives up.
    pub async fn generate_structured<T, E, F>(&self, prompt: &str, decode: F) -> GenerationResult<T>
    where
        F: FnOnce(&str) -> std::result::Result<Option<T>, E>,
        E: fmt::Display,
    {
        let _model_guard = match &self.gate {
            Some(gate) => {
                if !gate.enabled {
                    return Err(self.failure(GenerationError::FeatureDisabled, ""));
                }
                let state = gate.state.borrow().clone();
                if !state.is_initialized() {
                    return Err(self.failure(GenerationError::NotInitialized(state.to_string()), ""));
                }
                Some(gate.model_lock.read().await)
            }
            None => None,
        };

        tracing::debug!(
            prompt_len = prompt.len(),
            engine = self.engine.engine_name(),
            "Starting structured generation"
        );

        let stream = match self.engine.generate_stream(prompt).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Generation failed to start: {e}");
                return Err(self.failure(GenerationError::Stream(e.to_string()), ""));
            }
        };

        let (raw, interrupted) = aggregate_stream(stream).await;
        if let Some(e) = interrupted {
            tracing::error!(received = raw.len(), "Generation stream failed: {e}");
            return Err(self.failure(GenerationError::Stream(e.to_string()), &raw));
        }

        tracing::debug!(
            len = raw.len(),
            raw = %excerpt(&raw, self.excerpt_chars),
            "Received full response"
        );

        let payload = sanitize_response(&raw);
        match decode(payload) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => {
                tracing::warn!("Generated payload decoded to nothing");
                Err(self.failure(GenerationError::EmptyDecode, &raw))
            }
            Err(e) => {
                tracing::warn!("Generated payload is malformed: {e}");
                Err(self.failure(GenerationError::MalformedPayload(e.to_string()), &raw))
            }
        }
    }

    /// Generate and decode with [`decode_json`]
    pub async fn generate_json<T: DeserializeOwned>(&self, prompt: &str) -> GenerationResult<T> {
        self.generate_structured(prompt, decode_json::<T>).await
    }
}

/// Concatenate fragments in arrival order.
///
/// Returns the text received so far and, if the stream failed, the error
/// that ended it.
pub async fn aggregate_stream(mut stream: TokenStream) -> (String, Option<CuratorError>) {
    let mut buf = String::new();
    while let Some(fragment) = stream.next().await {
        match fragment {
            Ok(text) => buf.push_str(&text),
            Err(e) => return (buf, Some(e)),
        }
    }
    (buf, None)
}

/// Decode a JSON payload; empty input and `null` decode to nothing
pub fn decode_json<T: DeserializeOwned>(payload: &str) -> serde_json::Result<Option<T>> {
    if payload.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<Option<T>>(payload)
}

fn excerpt(raw: &str, max_chars: usize) -> String {
    raw.chars().take(max_chars).collect()
}
