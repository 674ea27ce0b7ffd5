//! Error types for stacked transforms and feature-channel metrics.

use thiserror::Error;

/// Result alias for fallible configuration and evaluation.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while configuring or evaluating transforms and metrics.
///
/// Every variant except [Error::Dispatch] is a configuration error:
/// it is raised synchronously by the offending call,
/// and the object it was called on keeps its previous valid state.
#[derive(Debug, Error)]
pub enum Error {
    /// A stack must hold at least one sub-transform.
    #[error("stack size must be at least 1")]
    InvalidStackSize,
    /// B-spline sub-transforms and interpolators support orders 1, 2 and 3.
    #[error("unsupported spline order {0}, expected 1, 2 or 3")]
    UnsupportedSplineOrder(u32),
    /// A B-spline sub-transform was requested without a control grid.
    #[error("B-spline sub-transforms need a control grid")]
    MissingControlGrid,
    /// An index into a list was not in `[0, len)`.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    /// A parameter vector of the wrong length was given.
    #[error("expected {expected} parameters, got {got}")]
    ParameterLength { expected: usize, got: usize },
    /// Two objects which must share a dimensionality do not.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// Origin, spacing or size of a grid or image is unusable.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    /// A channel has an image but no interpolator after defaults were assigned.
    #[error("feature channel {channel} has an image but no interpolator")]
    MissingInterpolator { channel: usize },
    /// A channel's interpolator samples a different image than the one set on the channel.
    #[error("feature channel {channel} has an interpolator bound to a different image")]
    InterpolatorImageMismatch { channel: usize },
    /// Evaluation was requested before `initialize`.
    #[error("feature channels have not been initialized")]
    NotInitialized,
    /// A configuration value is missing or outside its domain.
    #[error("invalid parameter {key}: {reason}")]
    InvalidParameter { key: String, reason: String },
    /// A component name is not known to the construction hook.
    #[error("unknown component {0:?}")]
    UnknownComponent(String),
    /// Offloaded computation failed; the whole pass is aborted.
    #[error("dispatch failed: {0}")]
    Dispatch(String),
}

impl Error {
    /// Whether this error was caused by bad configuration,
    /// as opposed to a failure of offloaded computation.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Error::Dispatch(_))
    }

    pub(crate) fn invalid_parameter(key: &str, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Reject parameter vectors with NaN or infinite entries.
pub(crate) fn check_finite(key: &str, values: &[f64]) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(idx) => Err(Error::invalid_parameter(
            key,
            format!("entry {idx} is not finite"),
        )),
        None => Ok(()),
    }
}

pub(crate) fn check_index(index: usize, len: usize) -> Result<()> {
    if index >= len {
        return Err(Error::IndexOutOfRange { index, len });
    }
    Ok(())
}
