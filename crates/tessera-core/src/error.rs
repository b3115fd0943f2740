use crate::shape::Shape;

/// All errors that can occur while preparing or launching a tessera kernel.
///
/// Numerical domain problems (`log(0)`, `0 * -inf`) are never reported here:
/// the kernels absorb them into defined values. Out-of-range work items are
/// silent no-ops. What remains are structural problems with descriptors,
/// buffers and configuration, plus applicability rejections.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two tensors that must agree in shape do not.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Operation requires a specific rank.
    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    /// A descriptor has more dimensions than the fixed-rank view it feeds.
    #[error("rank {rank} does not fit a tensor view of rank {max}")]
    RankTooLarge { rank: usize, max: usize },

    /// A flat buffer cannot hold every offset its layout addresses.
    #[error("buffer too small: layout addresses {required} elements, buffer has {got}")]
    BufferTooSmall { required: usize, got: usize },

    /// Strides and sizes disagree in length.
    #[error("stride count {strides} does not match rank {rank}")]
    StrideRankMismatch { strides: usize, rank: usize },

    /// The problem is valid but no kernel variant accepts it.
    #[error("{op}: no applicable kernel ({reason})")]
    NotApplicable { op: &'static str, reason: String },

    /// A kernel configuration value is unusable.
    #[error("invalid kernel config: {0}")]
    InvalidConfig(String),

    /// The caller supplied a workspace shorter than the problem requires.
    #[error("workspace too small: need {required} elements, got {got}")]
    WorkspaceTooSmall { required: usize, got: usize },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Applicability rejection for `op`.
    pub fn not_applicable(op: &'static str, reason: impl Into<String>) -> Self {
        Error::NotApplicable {
            op,
            reason: reason.into(),
        }
    }
}

/// Convenience Result type used throughout tessera.
pub type Result<T> = std::result::Result<T, Error>;

/// Early return with a formatted error message.
/// Usage: `bail!("unsupported spatial rank {}", rank)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
