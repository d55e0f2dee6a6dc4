use crate::common::*;
use thiserror::Error;

/// Failures raised by augmentation transforms.
#[derive(Debug, Error)]
pub enum AugmentError {
    #[error("channel size must be 3, but get {0}")]
    ChannelMismatch(i64),
    #[error("degenerate input box {0:?}")]
    DegenerateBox([f32; 4]),
    #[error("got {boxes} boxes but {labels} labels")]
    LengthMismatch { boxes: usize, labels: usize },
    #[error("tensor operation failed: {0}")]
    Tensor(#[from] TchError),
}

impl AugmentError {
    /// Whether the sample can fall back to the unaugmented image.
    ///
    /// A length mismatch means boxes and labels are out of sync and is never recovered.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::LengthMismatch { .. })
    }
}
