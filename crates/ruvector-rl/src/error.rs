//! Error types for the RL training core.
//!
//! Configuration problems are raised before any state is mutated. Numerical
//! instability carries enough context (step, layer, norm) to reproduce.

/// Result type for training-core operations
pub type Result<T> = std::result::Result<T, RlError>;

/// Errors raised by the replay buffer, optimizer, clipper, initializer and
/// exploration policies.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RlError {
    /// A configuration value is outside its valid range.
    #[error("invalid config `{field}`: {reason}")]
    InvalidConfig {
        /// Name of the offending field.
        field: String,
        /// Human-readable description of the violated constraint.
        reason: String,
    },

    /// Shapes or lengths of two inputs that must agree do not.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected shape or length.
        expected: String,
        /// Actual shape or length.
        actual: String,
    },

    /// More experiences were requested than the buffer holds.
    #[error("insufficient samples: requested {requested}, buffer holds {available}")]
    InsufficientSamples {
        /// Requested batch size.
        requested: usize,
        /// Current occupancy.
        available: usize,
    },

    /// A NaN or infinite value reached a numeric routine.
    #[error("numerical instability at step {step} (layer {layer:?}, norm {norm_type}): {detail}")]
    NumericalInstability {
        /// Optimizer or clipper step at which the value was seen.
        step: u64,
        /// First layer holding a non-finite value, if known.
        layer: Option<usize>,
        /// Norm in use when the value was detected.
        norm_type: String,
        /// Human-readable explanation.
        detail: String,
    },

    /// Unrecognised exploration strategy name.
    #[error("unknown exploration strategy: {0}")]
    UnknownStrategy(String),

    /// Unrecognised gradient norm name.
    #[error("unknown norm type: {0}")]
    UnknownNormType(String),

    /// Unrecognised layer type name.
    #[error("unknown layer type: {0}")]
    UnknownLayerType(String),

    /// An index does not address an occupied slot.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange {
        /// Offending index.
        index: usize,
        /// Valid length.
        len: usize,
    },
}

impl RlError {
    /// Build an [`RlError::InvalidConfig`]
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Build an [`RlError::DimensionMismatch`]
    pub fn dimension_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// True for errors that indicate bad input rather than runtime state.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::DimensionMismatch { .. }
                | Self::UnknownStrategy(_)
                | Self::UnknownNormType(_)
                | Self::UnknownLayerType(_)
                | Self::IndexOutOfRange { .. }
        )
    }
}
