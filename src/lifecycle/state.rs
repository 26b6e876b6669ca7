use crate::error::CuratorError;
use std::fmt;
use std::sync::Arc;

/// Engine bootstrap progress, shared with every observer
#[derive(Debug, Clone, Default)]
pub enum InitializationState {
    #[default]
    Idle,
    Initializing,
    Initialized,
    Failed(Arc<CuratorError>),
}

impl InitializationState {
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        matches!(self, Self::Initialized)
    }

    /// Bootstrap finished, successfully or not
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Initialized | Self::Failed(_))
    }
}

impl fmt::Display for InitializationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Not initialized"),
            Self::Initializing => f.write_str("Initializing..."),
            Self::Initialized => f.write_str("Ready"),
            Self::Failed(cause) => write!(f, "Failed: {cause}"),
        }
    }
}
