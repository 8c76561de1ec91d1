use thiserror::Error;

use crate::imageops_cutout::pipeline::PipelineStage;

/// Error type for individual cutout stages
///
/// Every stage function (detection, refinement, matting, compositing)
/// reports structural problems through this type. Numeric edge cases such as
/// empty clusters or coinciding colors are handled inside the stages and never
/// show up here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Image and mask dimensions do not match
    ///
    /// All grids belonging to one run share the same width and height.
    #[error("Image and mask dimensions do not match: expected {expected:?}, actual {actual:?}")]
    DimensionMismatch {
        /// Expected dimensions (width, height)
        expected: (u32, u32),
        /// Actual dimensions (width, height)
        actual: (u32, u32),
    },

    /// The image is empty or its raw buffer does not hold `width * height * 4` bytes
    #[error("Invalid image dimensions {width}x{height} for a buffer of {buffer_len} bytes")]
    InvalidDimensions {
        width: u32,
        height: u32,
        buffer_len: usize,
    },

    /// Failed to create ImageBuffer from processed pixels
    #[error("Failed to create ImageBuffer from processed pixels")]
    ImageBufferCreationFailed,

    /// Invalid parameter provided to the operation
    ///
    /// Returned by the `validate` methods of the configuration structs.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A stage panicked; the message of the panic is kept
    #[error("Internal fault: {0}")]
    Internal(String),
}

/// Error type returned by the background removal entry points
///
/// A failed run never yields partial output. The caller may resubmit,
/// possibly after downscaling to a lower quality tier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The input was rejected before any stage started
    #[error("Invalid input dimensions {width}x{height} for a buffer of {buffer_len} bytes")]
    InvalidDimensions {
        width: u32,
        height: u32,
        buffer_len: usize,
    },

    /// A stage aborted the run
    #[error("Background removal failed during {stage}: {source}")]
    StageFailure {
        /// The stage that was running when the fault occurred
        stage: PipelineStage,
        #[source]
        source: Error,
    },

    /// The progress observer requested cancellation before `stage` started
    #[error("Background removal cancelled before {stage}")]
    Cancelled { stage: PipelineStage },
}

impl PipelineError {
    /// Stage the run stopped in, if it got that far
    pub const fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::InvalidDimensions { .. } => None,
            Self::StageFailure { stage, .. } | Self::Cancelled { stage } => Some(*stage),
        }
    }
}
