//! Model lifecycle management
//!
//! [`LifecycleManager`] owns engine bootstrap, the known-model list, download
//! progress and the active model. State is published through `watch`
//! channels so observers always see the last committed value.
//!
//! # Example
//!
//! ```no_run
//! use curator::config::Config;
//! use curator::lifecycle::LifecycleManager;
//!
//! # async fn run() -> curator::Result<()> {
//! let manager = LifecycleManager::from_config(&Config::load()?)?;
//! manager.initialize();
//! println!("{}", manager.wait_until_settled().await);
//!
//! if manager.load_model("qwen2.5:0.5b-instruct").await {
//!     let result = manager
//!         .pipeline()
//!         .generate_json::<serde_json::Value>("Reply with a JSON object")
//!         .await;
//!     println!("{result:?}");
//! }
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod state;

pub use state::InitializationState;

use crate::config::{Config, EngineConfig};
use crate::engine::{self, InferenceEngine};
use crate::error::{CuratorError, Result};
use crate::generation::{GenerationPipeline, PipelineGate};
use crate::models::{ModelInfo, ModelRegistry};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// In-flight fractions keyed by model id
pub type DownloadProgress = HashMap<String, f32>;

/// Releases a download's progress entry, even when the caller drops the
/// download future
struct ProgressClaim<'a> {
    progress: &'a watch::Sender<DownloadProgress>,
    model_id: &'a str,
}

impl Drop for ProgressClaim<'_> {
    fn drop(&mut self) {
        self.progress.send_modify(|progress| {
            progress.remove(self.model_id);
        });
    }
}

struct InitTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    engine: Arc<dyn InferenceEngine>,
    registry: ModelRegistry,
    engine_config: EngineConfig,
    enabled: bool,
    excerpt_chars: usize,
    state: watch::Sender<InitializationState>,
    models: watch::Sender<Vec<ModelInfo>>,
    current_model: watch::Sender<Option<String>>,
    progress: watch::Sender<DownloadProgress>,
    init_task: Mutex<Option<InitTask>>,
    /// Write-held by load/unload, read-held by generation
    model_lock: Arc<RwLock<()>>,
}

/// Owns engine bootstrap and the model lifecycle
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("engine", &self.inner.engine.engine_name())
            .field("enabled", &self.inner.enabled)
            .field("state", &*self.inner.state.borrow())
            .field("current_model", &*self.inner.current_model.borrow())
            .finish_non_exhaustive()
    }
}

impl LifecycleManager {
    /// Create manager around an engine
    #[must_use]
    pub fn new(engine: Arc<dyn InferenceEngine>, registry: ModelRegistry, config: &Config) -> Self {
        let (state, _) = watch::channel(InitializationState::Idle);
        let (models, _) = watch::channel(Vec::new());
        let (current_model, _) = watch::channel(None);
        let (progress, _) = watch::channel(DownloadProgress::new());

        Self {
            inner: Arc::new(Inner {
                engine,
                registry,
                engine_config: config.engine.clone(),
                enabled: config.ai.enabled,
                excerpt_chars: config.generation.diagnostic_excerpt_chars,
                state,
                models,
                current_model,
                progress,
                init_task: Mutex::new(None),
                model_lock: Arc::new(RwLock::new(())),
            }),
        }
    }

    /// Create manager with the configured engine and catalog
    pub fn from_config(config: &Config) -> Result<Self> {
        let engine = engine::from_config(&config.engine)?;
        Ok(Self::new(engine, ModelRegistry::from_config(config), config))
    }

    /// Whether the feature flag allows model operations
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn state(&self) -> watch::Receiver<InitializationState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn models(&self) -> watch::Receiver<Vec<ModelInfo>> {
        self.inner.models.subscribe()
    }

    #[must_use]
    pub fn current_model_id(&self) -> watch::Receiver<Option<String>> {
        self.inner.current_model.subscribe()
    }

    #[must_use]
    pub fn download_progress(&self) -> watch::Receiver<DownloadProgress> {
        self.inner.progress.subscribe()
    }

    #[must_use]
    pub fn current_state(&self) -> InitializationState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn active_model(&self) -> Option<String> {
        self.inner.current_model.borrow().clone()
    }

    fn is_initialized(&self) -> bool {
        self.inner.state.borrow().is_initialized()
    }

    /// Start engine bootstrap in the background.
    ///
    /// No-op when disabled or already initialized. A bootstrap still in
    /// flight is cancelled and replaced.
    pub fn initialize(&self) {
        if !self.inner.enabled {
            tracing::warn!("AI features disabled, skipping initialization");
            return;
        }

        let mut slot = self.inner.lock_init_task();
        if self.is_initialized() {
            tracing::debug!("Already initialized, skipping");
            return;
        }

        if let Some(previous) = slot.take() {
            tracing::info!("Cancelling in-flight initialization");
            previous.token.cancel();
        }

        let token = CancellationToken::new();
        self.inner
            .state
            .send_replace(InitializationState::Initializing);

        let inner = Arc::clone(&self.inner);
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = task_token.cancelled() => {
                    tracing::debug!("Initialization superseded");
                    return;
                }
                outcome = inner.bootstrap() => outcome,
            };
            inner.commit_bootstrap(&task_token, outcome);
        });

        *slot = Some(InitTask { token, handle });
    }

    /// Wait for the current bootstrap to reach `Initialized` or `Failed`.
    ///
    /// Returns immediately when disabled or when nothing was started, and
    /// with `Idle` when [`shutdown`](Self::shutdown) cancels the bootstrap.
    pub async fn wait_until_settled(&self) -> InitializationState {
        let mut rx = self.inner.state.subscribe();
        let current = rx.borrow_and_update().clone();
        if !self.inner.enabled || matches!(current, InitializationState::Idle) {
            return current;
        }

        let settled = rx
            .wait_for(|state| state.is_settled() || matches!(state, InitializationState::Idle))
            .await
            .map(|state| InitializationState::clone(&state));
        settled.unwrap_or_else(|_| self.current_state())
    }

    /// Re-query the engine's model list.
    ///
    /// Returns the cached list when not initialized or when the query fails.
    pub async fn refresh_models(&self) -> Vec<ModelInfo> {
        if !self.inner.enabled {
            return Vec::new();
        }

        if !self.is_initialized() {
            tracing::warn!(
                state = %self.current_state(),
                "Cannot refresh models before initialization"
            );
            return self.inner.models.borrow().clone();
        }

        match self.inner.engine.list_available_models().await {
            Ok(updated) => {
                tracing::debug!(count = updated.len(), "Model list refreshed");
                self.inner.models.send_replace(updated.clone());
                updated
            }
            Err(e) => {
                tracing::error!("Model refresh failed: {e}");
                self.inner.models.borrow().clone()
            }
        }
    }

    /// Download a model, forwarding each progress fraction.
    ///
    /// The model list is refreshed afterwards whether or not the download
    /// succeeded. Errors are logged and returned to the caller.
    pub async fn download_model<F>(&self, model_id: &str, mut on_progress: F) -> Result<()>
    where
        F: FnMut(f32) + Send,
    {
        if !self.inner.enabled {
            return Ok(());
        }

        if !self.is_initialized() {
            return Err(CuratorError::NotInitialized(self.current_state().to_string()));
        }

        let claimed = self.inner.progress.send_if_modified(|progress| {
            if progress.contains_key(model_id) {
                false
            } else {
                progress.insert(model_id.to_string(), 0.0);
                true
            }
        });
        if !claimed {
            tracing::warn!(model_id, "Download already in progress");
            return Err(CuratorError::DownloadInProgress(model_id.to_string()));
        }

        let claim = ProgressClaim {
            progress: &self.inner.progress,
            model_id,
        };
        tracing::info!(model_id, "Starting model download");
        let outcome = self.run_download(model_id, &mut on_progress).await;
        drop(claim);

        match &outcome {
            Ok(()) => tracing::info!(model_id, "Model download complete"),
            Err(e) => tracing::error!(model_id, "Model download failed: {e}"),
        }

        self.refresh_models().await;
        outcome
    }

    async fn run_download<F>(&self, model_id: &str, on_progress: &mut F) -> Result<()>
    where
        F: FnMut(f32) + Send,
    {
        let mut updates = self.inner.engine.download_model(model_id).await?;
        while let Some(update) = updates.next().await {
            let fraction = update?.clamp(0.0, 1.0);
            self.inner.progress.send_modify(|progress| {
                progress.insert(model_id.to_string(), fraction);
            });
            on_progress(fraction);
        }
        Ok(())
    }

    /// Load a model and make it active.
    ///
    /// Returns `false` when disabled, not initialized, or the engine refuses
    /// or fails. A failed or refused load leaves no model active, even if
    /// another model was active before: the engine may already have evicted
    /// it.
    pub async fn load_model(&self, model_id: &str) -> bool {
        if !self.inner.enabled {
            return false;
        }

        if !self.is_initialized() {
            tracing::warn!(
                model_id,
                state = %self.current_state(),
                "Cannot load model before initialization"
            );
            return false;
        }

        let _guard = self.inner.model_lock.write().await;
        let loaded = match self.inner.engine.load_model(model_id).await {
            Ok(true) => {
                tracing::info!(model_id, "Model loaded");
                true
            }
            Ok(false) => {
                tracing::warn!(model_id, "Engine refused to load model");
                false
            }
            Err(e) => {
                tracing::error!(model_id, "Model load failed: {e}");
                false
            }
        };

        self.inner
            .current_model
            .send_replace(loaded.then(|| model_id.to_string()));
        loaded
    }

    /// Unload the active model; engine failures are logged only
    pub async fn unload_model(&self) {
        if !self.inner.enabled {
            return;
        }

        let _guard = self.inner.model_lock.write().await;
        if let Err(e) = self.inner.engine.unload_model().await {
            tracing::error!("Model unload failed: {e}");
        }
        self.inner.current_model.send_replace(None);
        tracing::info!("Model unloaded");
    }

    /// Generation pipeline sharing this manager's feature flag, state and
    /// load/unload lock
    #[must_use]
    pub fn pipeline(&self) -> GenerationPipeline {
        GenerationPipeline::new(Arc::clone(&self.inner.engine))
            .with_excerpt_chars(self.inner.excerpt_chars)
            .with_gate(PipelineGate {
                enabled: self.inner.enabled,
                state: self.inner.state.subscribe(),
                model_lock: Arc::clone(&self.inner.model_lock),
            })
    }

    /// Cancel any bootstrap in flight and release the active model.
    ///
    /// A cancelled bootstrap leaves the state `Idle`.
    pub async fn shutdown(&self) {
        let task = {
            let mut slot = self.inner.lock_init_task();
            let task = slot.take();
            if let Some(task) = &task {
                task.token.cancel();
                self.inner.state.send_if_modified(|state| {
                    if matches!(state, InitializationState::Initializing) {
                        *state = InitializationState::Idle;
                        true
                    } else {
                        false
                    }
                });
            }
            task
        };

        if let Some(task) = task {
            if let Err(e) = task.handle.await {
                tracing::warn!("Initialization task ended abnormally: {e}");
            }
        }

        if self.active_model().is_some() {
            self.unload_model().await;
        }
        tracing::info!("Lifecycle manager shut down");
    }
}

impl Inner {
    fn lock_init_task(&self) -> MutexGuard<'_, Option<InitTask>> {
        self.init_task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn bootstrap(&self) -> Result<Vec<ModelInfo>> {
        tracing::info!(engine = self.engine.engine_name(), "Starting engine initialization");
        self.engine.initialize(&self.engine_config).await?;
        self.engine.register_provider().await?;
        self.register_catalog().await;

        if let Err(e) = self.engine.scan_for_downloaded_models().await {
            tracing::warn!("Scan for downloaded models failed (non-fatal): {e}");
        }

        let models = self.engine.list_available_models().await?;
        tracing::info!(count = models.len(), "Engine initialization complete");
        Ok(models)
    }

    async fn register_catalog(&self) {
        for entry in self.registry.entries() {
            match self
                .engine
                .add_model_from_url(&entry.url, &entry.name, entry.category)
                .await
            {
                Ok(info) => tracing::debug!(model_id = %info.id, "Registered catalog model"),
                Err(e) => tracing::warn!(name = %entry.name, "Model registration failed: {e}"),
            }
        }
    }

    /// Publish a bootstrap outcome unless a newer initialization replaced it
    fn commit_bootstrap(&self, token: &CancellationToken, outcome: Result<Vec<ModelInfo>>) {
        let _slot = self.lock_init_task();
        if token.is_cancelled() {
            tracing::debug!("Discarding superseded initialization outcome");
            return;
        }

        match outcome {
            Ok(models) => {
                self.models.send_replace(models);
                self.state.send_replace(InitializationState::Initialized);
            }
            Err(e) => {
                tracing::error!("Engine initialization failed: {e}");
                self.state
                    .send_replace(InitializationState::Failed(Arc::new(e)));
            }
        }
    }
}
