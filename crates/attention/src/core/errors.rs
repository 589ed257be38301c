//! Error types emitted by attention kernels.

/// Attention-specific error category.
#[derive(Debug)]
pub enum AttentionError {
    /// The supplied tensor shapes do not align with the documented contract.
    InvalidShape { context: String },
    /// The kernel does not support the requested data type.
    UnsupportedDType { requested: String },
    /// The tiled kernels only implement a fixed range of pipeline depths.
    UnsupportedStages { stages: usize },
    /// A backend-specific failure propagated to the caller.
    Backend { message: String },
}

impl AttentionError {
    pub(crate) fn shape(context: impl Into<String>) -> Self {
        Self::InvalidShape {
            context: context.into(),
        }
    }
}

impl std::fmt::Display for AttentionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttentionError::InvalidShape { context } => {
                write!(f, "invalid tensor shape: {context}")
            }
            AttentionError::UnsupportedDType { requested } => {
                write!(f, "unsupported dtype {requested}")
            }
            AttentionError::UnsupportedStages { stages } => {
                write!(
                    f,
                    "unsupported stage count {stages} (expected 1..={})",
                    super::config::MAX_STAGES
                )
            }
            AttentionError::Backend { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for AttentionError {}

impl From<candle_core::Error> for AttentionError {
    fn from(err: candle_core::Error) -> Self {
        AttentionError::Backend {
            message: err.to_string(),
        }
    }
}
