//! Configuration for the lifecycle manager and the inference engine
//!
//! Read from `curator/config.toml` under the user config directory. Missing
//! sections and fields take their defaults, so an empty or absent file is a
//! valid configuration.
//!
//! `[ai] enabled` is the feature flag: with it off, a manager built from the
//! config never contacts the engine and every operation is a no-op.
//!
//! ```no_run
//! use curator::config::Config;
//! use curator::lifecycle::LifecycleManager;
//!
//! # async fn run() -> curator::Result<()> {
//! let mut config = Config::load()?;
//! config.ai.enabled = false;
//!
//! let manager = LifecycleManager::from_config(&config)?;
//! manager.initialize();
//! assert!(!manager.load_model("llama3.2:1b").await);
//! assert!(manager.refresh_models().await.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod schema;

pub use schema::{config_path, AiConfig, Config, EngineConfig, GenerationConfig};
