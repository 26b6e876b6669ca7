use thiserror::Error;

/// Main error type for Curator
#[derive(Error, Debug)]
pub enum CuratorError {
    #[error("Inference engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Config error: {0}\n\nTroubleshooting:\n- Check config file: ~/.config/curator/config.toml\n- Remove the file to fall back to built-in defaults\n- Run with RUST_LOG=debug for more details")]
    Config(String),

    #[error("AI features are not initialized (state: {0})\n\nTroubleshooting:\n- Call initialize() and wait for the Ready state\n- Check that [ai] enabled = true in config")]
    NotInitialized(String),

    #[error("Model '{0}' is already downloading")]
    DownloadInProgress(String),

    #[error("Model '{0}' is not in the catalog")]
    UnknownModel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Failures reported by the inference engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine unavailable: {0}\n\nTroubleshooting:\n- Is the Ollama daemon running? Start with: ollama serve\n- Check [engine] base_url in config\n- Try increasing request_timeout_secs")]
    Unavailable(String),

    #[error("Engine request failed: {0}")]
    Request(String),

    #[error("Unexpected engine response: {0}")]
    Protocol(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("No model is loaded")]
    NoModelLoaded,

    #[error("Engine has not been initialized")]
    NotInitialized,
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Self::Unavailable(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, CuratorError>;
