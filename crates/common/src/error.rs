use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown rate-limit policy: {0}")]
    UnknownPolicy(String),

    #[error("invalid policy '{name}': {reason}")]
    InvalidPolicy { name: String, reason: String },

    #[error("counter backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl GateError {
    /// Returns `true` for errors caused by wiring or configuration mistakes
    /// rather than runtime conditions.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            GateError::Config(_) | GateError::UnknownPolicy(_) | GateError::InvalidPolicy { .. }
        )
    }
}

pub type GateResult<T> = Result<T, GateError>;
