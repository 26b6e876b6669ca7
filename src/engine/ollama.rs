use crate::config::EngineConfig;
use crate::engine::{ndjson, InferenceEngine, ProgressStream, TokenStream};
use crate::error::{CuratorError, EngineError, Result};
use crate::models::{reference_id, ModelCategory, ModelInfo};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::RwLock;

/// Provider name reported once the daemon is confirmed reachable
const PROVIDER: &str = "llama.cpp";

#[derive(Debug, Clone)]
struct RegisteredModel {
    id: String,
    name: String,
    category: ModelCategory,
}

#[derive(Debug, Default)]
struct EngineState {
    initialized: bool,
    provider: Option<&'static str>,
    catalog: Vec<RegisteredModel>,
    downloaded: HashSet<String>,
    loaded: Option<String>,
}

/// Inference engine backed by a local Ollama daemon
pub struct OllamaEngine {
    client: reqwest::Client,
    base_url: String,
    keep_alive: String,
    temperature: f32,
    max_tokens: u32,
    state: RwLock<EngineState>,
}

impl std::fmt::Debug for OllamaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaEngine")
            .field("client", &"Client { ... }")
            .field("base_url", &self.base_url)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PullEvent {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct KeepAliveRequest<'a> {
    model: &'a str,
    keep_alive: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    keep_alive: &'a str,
    options: GenerateOptions,
}

impl OllamaEngine {
    /// Create new Ollama engine from config
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CuratorError::Engine(EngineError::from(e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            keep_alive: config.keep_alive.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            state: RwLock::new(EngineState::default()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn ensure_initialized(&self) -> Result<()> {
        if self.state.read().await.initialized {
            Ok(())
        } else {
            Err(EngineError::NotInitialized.into())
        }
    }

    /// Names of models present in the daemon's local store
    async fn fetch_local_models(&self) -> Result<HashSet<String>> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .send()
            .await
            .map_err(EngineError::from)?;
        let response = check_status(response).await?;
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Protocol(format!("invalid tag list: {e}")))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Set the keep-alive of a model; `0` evicts it from memory
    async fn set_keep_alive(
        &self,
        model_id: &str,
        keep_alive: serde_json::Value,
    ) -> Result<StatusCode> {
        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&KeepAliveRequest {
                model: model_id,
                keep_alive,
            })
            .send()
            .await
            .map_err(EngineError::from)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(status);
        }
        check_status(response).await?;
        Ok(status)
    }
}

/// Map a non-success HTTP status to an engine error carrying the body
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);

    if status == StatusCode::NOT_FOUND {
        Err(EngineError::ModelNotFound(message).into())
    } else {
        Err(EngineError::Request(format!("HTTP {status}: {message}")).into())
    }
}

/// Translate one pull status line into a progress fraction
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn pull_progress(event: &PullEvent) -> Result<Option<f32>> {
    if let Some(error) = &event.error {
        return Err(EngineError::Request(error.clone()).into());
    }

    if event.status.as_deref() == Some("success") {
        return Ok(Some(1.0));
    }

    match (event.completed, event.total) {
        (Some(completed), Some(total)) if total > 0 => {
            Ok(Some((completed as f64 / total as f64).clamp(0.0, 1.0) as f32))
        }
        _ => Ok(None),
    }
}

struct PullState {
    events: BoxStream<'static, Result<PullEvent>>,
    succeeded: bool,
    finished: bool,
}

/// Progress fractions for a pull; ends with an error unless the daemon
/// reported `success` before the body closed
fn pull_progress_stream<S>(events: S) -> ProgressStream
where
    S: Stream<Item = Result<PullEvent>> + Send + 'static,
{
    let state = PullState {
        events: events.boxed(),
        succeeded: false,
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        if st.finished {
            return None;
        }
        loop {
            match st.events.next().await {
                Some(Ok(event)) => {
                    st.succeeded |= event.status.as_deref() == Some("success");
                    match pull_progress(&event) {
                        Ok(Some(fraction)) => return Some((Ok(fraction), st)),
                        Ok(None) => continue,
                        Err(e) => {
                            st.finished = true;
                            return Some((Err(e), st));
                        }
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.finished = true;
                    if st.succeeded {
                        return None;
                    }
                    let err = EngineError::Protocol("pull ended before success".to_string());
                    return Some((Err(err.into()), st));
                }
            }
        }
    })
    .boxed()
}

/// Translate one generate line into a text fragment
fn generated_fragment(chunk: GenerateChunk) -> Result<Option<String>> {
    if let Some(error) = chunk.error {
        return Err(EngineError::Request(error).into());
    }
    if chunk.response.is_empty() {
        Ok(None)
    } else {
        Ok(Some(chunk.response))
    }
}

/// Catalog models first, then local models the catalog does not know
fn merge_models(catalog: &[RegisteredModel], local: &HashSet<String>) -> Vec<ModelInfo> {
    let mut models: Vec<ModelInfo> = catalog
        .iter()
        .map(|m| ModelInfo {
            id: m.id.clone(),
            name: m.name.clone(),
            category: m.category,
            is_downloaded: local.contains(&m.id),
        })
        .collect();

    let mut extra: Vec<&String> = local
        .iter()
        .filter(|name| !catalog.iter().any(|m| &m.id == *name))
        .collect();
    extra.sort();

    models.extend(extra.into_iter().map(|name| ModelInfo {
        id: name.clone(),
        name: name.clone(),
        category: ModelCategory::Language,
        is_downloaded: true,
    }));

    models
}

#[async_trait]
impl InferenceEngine for OllamaEngine {
    async fn initialize(&self, _config: &EngineConfig) -> Result<()> {
        let response = self
            .client
            .get(self.url("/api/version"))
            .send()
            .await
            .map_err(|e| EngineError::Unavailable(format!("{}: {e}", self.base_url)))?;
        let response = check_status(response).await?;
        let version: VersionResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Protocol(format!("invalid version response: {e}")))?;

        tracing::info!(version = %version.version, url = %self.base_url, "Ollama daemon reachable");
        self.state.write().await.initialized = true;
        Ok(())
    }

    async fn register_provider(&self) -> Result<()> {
        self.ensure_initialized().await?;
        self.state.write().await.provider = Some(PROVIDER);
        tracing::debug!(provider = PROVIDER, "Provider registered");
        Ok(())
    }

    async fn scan_for_downloaded_models(&self) -> Result<()> {
        self.ensure_initialized().await?;
        let local = self.fetch_local_models().await?;
        tracing::debug!(count = local.len(), "Scanned local models");
        self.state.write().await.downloaded = local;
        Ok(())
    }

    async fn list_available_models(&self) -> Result<Vec<ModelInfo>> {
        self.ensure_initialized().await?;
        let local = self.fetch_local_models().await?;
        let mut state = self.state.write().await;
        state.downloaded = local;
        Ok(merge_models(&state.catalog, &state.downloaded))
    }

    async fn add_model_from_url(
        &self,
        url: &str,
        name: &str,
        category: ModelCategory,
    ) -> Result<ModelInfo> {
        self.ensure_initialized().await?;
        let id = reference_id(url);
        let mut state = self.state.write().await;

        state.catalog.retain(|m| m.id != id);
        state.catalog.push(RegisteredModel {
            id: id.clone(),
            name: name.to_string(),
            category,
        });

        Ok(ModelInfo {
            is_downloaded: state.downloaded.contains(&id),
            id,
            name: name.to_string(),
            category,
        })
    }

    async fn download_model(&self, model_id: &str) -> Result<ProgressStream> {
        self.ensure_initialized().await?;
        let response = self
            .client
            .post(self.url("/api/pull"))
            .json(&PullRequest {
                model: model_id,
                stream: true,
            })
            .send()
            .await
            .map_err(EngineError::from)?;
        let response = check_status(response).await?;

        let events = ndjson::lines(response.bytes_stream())
            .map(|line| line.and_then(|l| ndjson::parse_line::<PullEvent>(&l)));

        Ok(pull_progress_stream(events))
    }

    async fn load_model(&self, model_id: &str) -> Result<bool> {
        self.ensure_initialized().await?;

        let previous = self.state.read().await.loaded.clone();
        if let Some(previous) = previous.filter(|p| p.as_str() != model_id) {
            if let Err(e) = self.set_keep_alive(&previous, serde_json::json!(0)).await {
                tracing::warn!(model_id = %previous, "Failed to evict previous model: {e}");
            }
            self.state.write().await.loaded = None;
        }

        let status = self
            .set_keep_alive(model_id, serde_json::json!(self.keep_alive))
            .await?;
        if status == StatusCode::NOT_FOUND {
            tracing::warn!(model_id, "Model not present locally");
            return Ok(false);
        }

        self.state.write().await.loaded = Some(model_id.to_string());
        Ok(true)
    }

    async fn unload_model(&self) -> Result<()> {
        let loaded = self.state.read().await.loaded.clone();
        let Some(model_id) = loaded else {
            return Ok(());
        };

        self.set_keep_alive(&model_id, serde_json::json!(0)).await?;
        self.state.write().await.loaded = None;
        Ok(())
    }

    async fn generate_stream(&self, prompt: &str) -> Result<TokenStream> {
        self.ensure_initialized().await?;
        let model_id = self
            .state
            .read()
            .await
            .loaded
            .clone()
            .ok_or(EngineError::NoModelLoaded)?;

        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&GenerateRequest {
                model: &model_id,
                prompt,
                stream: true,
                keep_alive: &self.keep_alive,
                options: GenerateOptions {
                    temperature: self.temperature,
                    num_predict: self.max_tokens,
                },
            })
            .send()
            .await
            .map_err(EngineError::from)?;
        let response = check_status(response).await?;

        let fragments = ndjson::lines(response.bytes_stream()).filter_map(|line| async move {
            line.and_then(|l| ndjson::parse_line::<GenerateChunk>(&l))
                .and_then(generated_fragment)
                .transpose()
        });

        // Nothing after an error line is trustworthy
        let fragments = fragments.scan(false, |failed, item| {
            let next = if *failed {
                None
            } else {
                *failed = item.is_err();
                Some(item)
            };
            futures_util::future::ready(next)
        });

        Ok(fragments.boxed())
    }

    fn engine_name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered(id: &str) -> RegisteredModel {
        RegisteredModel {
            id: id.to_string(),
            name: format!("Model {id}"),
            category: ModelCategory::Language,
        }
    }

    #[test]
    fn test_pull_progress_fraction() {
        let event: PullEvent =
            serde_json::from_str(r#"{"status":"pulling abc","total":200,"completed":50}"#).unwrap();
        assert_eq!(pull_progress(&event).unwrap(), Some(0.25));
    }

    #[test]
    fn test_pull_progress_without_totals() {
        let event: PullEvent = serde_json::from_str(r#"{"status":"pulling manifest"}"#).unwrap();
        assert_eq!(pull_progress(&event).unwrap(), None);

        let event: PullEvent =
            serde_json::from_str(r#"{"status":"pulling abc","total":0,"completed":0}"#).unwrap();
        assert_eq!(pull_progress(&event).unwrap(), None);
    }

    #[test]
    fn test_pull_progress_success_and_clamp() {
        let event: PullEvent = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert_eq!(pull_progress(&event).unwrap(), Some(1.0));

        let event: PullEvent =
            serde_json::from_str(r#"{"status":"x","total":10,"completed":12}"#).unwrap();
        assert_eq!(pull_progress(&event).unwrap(), Some(1.0));
    }

    #[test]
    fn test_pull_progress_error() {
        let event: PullEvent =
            serde_json::from_str(r#"{"error":"pull model manifest: file does not exist"}"#).unwrap();
        let err = pull_progress(&event).unwrap_err();
        assert!(err.to_string().contains("file does not exist"));
    }

    #[test]
    fn test_generated_fragment() {
        let chunk: GenerateChunk =
            serde_json::from_str(r#"{"model":"m","response":"{\"x\"","done":false}"#).unwrap();
        assert_eq!(generated_fragment(chunk).unwrap(), Some("{\"x\"".to_string()));

        let done: GenerateChunk =
            serde_json::from_str(r#"{"model":"m","response":"","done":true}"#).unwrap();
        assert_eq!(generated_fragment(done).unwrap(), None);

        let failed: GenerateChunk = serde_json::from_str(r#"{"error":"model unloaded"}"#).unwrap();
        assert!(generated_fragment(failed).is_err());
    }

    #[test]
    fn test_merge_models() {
        let catalog = vec![registered("a:latest"), registered("b:1b")];
        let local: HashSet<String> = ["b:1b", "z:latest", "c:latest"]
            .into_iter()
            .map(str::to_string)
            .collect();

        let models = merge_models(&catalog, &local);
        let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a:latest", "b:1b", "c:latest", "z:latest"]);
        assert!(!models[0].is_downloaded);
        assert!(models[1].is_downloaded);
        assert!(models[2].is_downloaded);
    }

    fn pull_events(lines: &[&str]) -> Vec<Result<PullEvent>> {
        lines
            .iter()
            .map(|l| Ok(serde_json::from_str(l).unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn test_pull_stream_completes_on_success() {
        let events = pull_events(&[
            r#"{"status":"pulling manifest"}"#,
            r#"{"status":"pulling abc","total":4,"completed":2}"#,
            r#"{"status":"success"}"#,
        ]);

        let fractions: Vec<f32> = pull_progress_stream(stream::iter(events))
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(fractions, vec![0.5, 1.0]);
    }

    #[tokio::test]
    async fn test_pull_stream_truncated_body_is_error() {
        let events = pull_events(&[
            r#"{"status":"pulling abc","total":4,"completed":1}"#,
            r#"{"status":"pulling abc","total":4,"completed":3}"#,
        ]);

        let results: Vec<Result<f32>> = pull_progress_stream(stream::iter(events)).collect().await;
        assert_eq!(results.len(), 3);
        assert_eq!(*results[1].as_ref().unwrap(), 0.75);
        let err = results[2].as_ref().unwrap_err();
        assert!(err.to_string().contains("pull ended before success"));
    }

    #[tokio::test]
    async fn test_pull_stream_stops_after_error() {
        let events = pull_events(&[
            r#"{"error":"manifest unknown"}"#,
            r#"{"status":"success"}"#,
        ]);

        let results: Vec<Result<f32>> = pull_progress_stream(stream::iter(events)).collect().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[tokio::test]
    async fn test_requires_initialize() {
        let engine = OllamaEngine::new(&EngineConfig::default()).unwrap();
        let err = engine.register_provider().await.unwrap_err();
        assert!(matches!(err, CuratorError::Engine(EngineError::NotInitialized)));

        let err = engine.generate_stream("hi").await.err().unwrap();
        assert!(matches!(err, CuratorError::Engine(EngineError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_unload_without_model_is_noop() {
        let engine = OllamaEngine::new(&EngineConfig::default()).unwrap();
        assert!(engine.unload_model().await.is_ok());
    }

    #[test]
    fn test_debug_hides_client() {
        let engine = OllamaEngine::new(&EngineConfig::default()).unwrap();
        let debug = format!("{engine:?}");
        assert!(debug.contains("127.0.0.1:11434"));
        assert!(debug.contains("Client { ... }"));
    }
}
