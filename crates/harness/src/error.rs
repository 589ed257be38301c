//! Error taxonomy for the benchmark engine.
//!
//! Numerical divergence is not an error: the comparator reports it as a
//! `false` verdict and the sweep carries on.

use thiserror::Error;

/// Errors surfaced while configuring or running a sweep.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A kernel variant failed during invocation. Never retried.
    #[error("kernel `{tag}` failed: {source}")]
    Kernel {
        tag: String,
        #[source]
        source: anyhow::Error,
    },
    /// Tensor bookkeeping performed by the engine itself failed.
    #[error("tensor operation failed: {0}")]
    Tensor(#[from] candle_core::Error),
    /// The device barrier reported a fault; the sweep cannot continue.
    #[error("device synchronization failed: {0}")]
    Synchronize(#[source] candle_core::Error),
    /// Two tensors that must be compared do not line up.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// The configuration file could not be parsed.
    #[error("failed to parse config: {0}")]
    ConfigFormat(String),
    /// The configuration parsed but violates one or more constraints.
    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    pub fn kernel(tag: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Kernel {
            tag: tag.into(),
            source,
        }
    }
}

impl From<toml::de::Error> for HarnessError {
    fn from(value: toml::de::Error) -> Self {
        HarnessError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(value: serde_json::Error) -> Self {
        HarnessError::ConfigFormat(value.to_string())
    }
}
