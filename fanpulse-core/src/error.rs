use thiserror::Error;

/// All errors produced by fanpulse-core.
#[derive(Debug, Error)]
pub enum FanPulseError {
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FanPulseError {
    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FanPulseError>;
