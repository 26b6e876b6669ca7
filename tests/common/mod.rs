#![allow(dead_code)]

use async_trait::async_trait;
use curator::config::{Config, EngineConfig};
use curator::engine::{InferenceEngine, ProgressStream, TokenStream};
use curator::error::{CuratorError, EngineError, Result};
use curator::lifecycle::LifecycleManager;
use curator::models::{ModelCategory, ModelInfo, ModelRegistry};
use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Behaviour of a [`ScriptedEngine`]
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub init_delay: Duration,
    /// Number of leading `initialize` calls that fail
    pub failing_inits: usize,
    pub fail_registration: bool,
    pub fail_scan: bool,
    pub fail_list: bool,
    /// List calls after this many succeed fail
    pub list_failures_after: Option<usize>,
    pub models: Vec<ModelInfo>,
    pub progress: Vec<f32>,
    pub progress_delay: Duration,
    pub fail_download: bool,
    pub refuse_load: Vec<String>,
    pub fail_load: Vec<String>,
    pub load_delay: Duration,
    pub fragments: Vec<std::result::Result<String, String>>,
    pub fragment_delay: Duration,
}

#[derive(Debug, Default)]
pub struct Calls {
    pub initialize: AtomicUsize,
    pub register_provider: AtomicUsize,
    pub scan: AtomicUsize,
    pub list: AtomicUsize,
    pub add_model: AtomicUsize,
    pub download: AtomicUsize,
    pub load: AtomicUsize,
    pub unload: AtomicUsize,
    pub generate: AtomicUsize,
}

impl Calls {
    pub fn total(&self) -> usize {
        [
            &self.initialize,
            &self.register_provider,
            &self.scan,
            &self.list,
            &self.add_model,
            &self.download,
            &self.load,
            &self.unload,
            &self.generate,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

/// In-memory engine that follows a [`Script`] and records every call
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    pub script: Script,
    pub calls: Calls,
    /// Ordered record of fragments yielded and load/unload completions
    pub log: Arc<Mutex<Vec<String>>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            ..Self::default()
        })
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self, event: String) {
        self.log.lock().unwrap().push(event);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn scripted_failure(what: &str) -> CuratorError {
    EngineError::Request(format!("scripted {what} failure")).into()
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    async fn initialize(&self, _config: &EngineConfig) -> Result<()> {
        let call = self.calls.initialize.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.script.init_delay).await;
        if call < self.script.failing_inits {
            return Err(EngineError::Unavailable("scripted daemon down".to_string()).into());
        }
        Ok(())
    }

    async fn register_provider(&self) -> Result<()> {
        self.calls.register_provider.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn scan_for_downloaded_models(&self) -> Result<()> {
        self.calls.scan.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_scan {
            return Err(scripted_failure("scan"));
        }
        Ok(())
    }

    async fn list_available_models(&self) -> Result<Vec<ModelInfo>> {
        let call = self.calls.list.fetch_add(1, Ordering::SeqCst);
        let exhausted = matches!(self.script.list_failures_after, Some(n) if call >= n);
        if self.script.fail_list || exhausted {
            return Err(scripted_failure("list"));
        }
        Ok(self.script.models.clone())
    }

    async fn add_model_from_url(
        &self,
        url: &str,
        name: &str,
        category: ModelCategory,
    ) -> Result<ModelInfo> {
        self.calls.add_model.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_registration {
            return Err(scripted_failure("registration"));
        }
        Ok(ModelInfo {
            id: url.to_string(),
            name: name.to_string(),
            category,
            is_downloaded: false,
        })
    }

    async fn download_model(&self, _model_id: &str) -> Result<ProgressStream> {
        self.calls.download.fetch_add(1, Ordering::SeqCst);
        let delay = self.script.progress_delay;
        let mut updates: Vec<Result<f32>> = self.script.progress.iter().copied().map(Ok).collect();
        if self.script.fail_download {
            updates.push(Err(scripted_failure("download")));
        }

        Ok(stream::iter(updates)
            .then(move |update| async move {
                tokio::time::sleep(delay).await;
                update
            })
            .boxed())
    }

    async fn load_model(&self, model_id: &str) -> Result<bool> {
        self.calls.load.fetch_add(1, Ordering::SeqCst);
        self.enter();
        tokio::time::sleep(self.script.load_delay).await;
        let outcome = if self.script.fail_load.iter().any(|id| id == model_id) {
            Err(scripted_failure("load"))
        } else {
            Ok(!self.script.refuse_load.iter().any(|id| id == model_id))
        };
        self.exit(format!("load:{model_id}"));
        outcome
    }

    async fn unload_model(&self) -> Result<()> {
        self.calls.unload.fetch_add(1, Ordering::SeqCst);
        self.enter();
        tokio::time::sleep(self.script.load_delay).await;
        self.exit("unload".to_string());
        Ok(())
    }

    async fn generate_stream(&self, _prompt: &str) -> Result<TokenStream> {
        self.calls.generate.fetch_add(1, Ordering::SeqCst);
        let delay = self.script.fragment_delay;
        let log = Arc::clone(&self.log);

        Ok(stream::iter(self.script.fragments.clone())
            .then(move |fragment| {
                let log = Arc::clone(&log);
                async move {
                    tokio::time::sleep(delay).await;
                    match fragment {
                        Ok(text) => {
                            log.lock().unwrap().push(format!("fragment:{text}"));
                            Ok(text)
                        }
                        Err(reason) => Err(CuratorError::Other(reason)),
                    }
                }
            })
            .boxed())
    }

    fn engine_name(&self) -> &str {
        "scripted"
    }
}

pub fn model(id: &str) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        name: id.to_string(),
        category: ModelCategory::Language,
        is_downloaded: true,
    }
}

pub fn fragments(parts: &[&str]) -> Vec<std::result::Result<String, String>> {
    parts.iter().map(|p| Ok((*p).to_string())).collect()
}

pub fn manager_with(engine: &Arc<ScriptedEngine>, config: &Config) -> LifecycleManager {
    LifecycleManager::new(
        Arc::clone(engine) as Arc<dyn InferenceEngine>,
        ModelRegistry::builtin(),
        config,
    )
}

pub fn manager(engine: &Arc<ScriptedEngine>) -> LifecycleManager {
    manager_with(engine, &Config::default())
}

pub fn disabled_config() -> Config {
    let mut config = Config::default();
    config.ai.enabled = false;
    config
}

/// Initialize and wait until the bootstrap settles
pub async fn ready_manager(engine: &Arc<ScriptedEngine>) -> LifecycleManager {
    let manager = manager(engine);
    manager.initialize();
    let state = manager.wait_until_settled().await;
    assert!(state.is_initialized(), "bootstrap did not succeed: {state}");
    manager
}

/// Poll until `condition` holds, failing after two seconds
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
