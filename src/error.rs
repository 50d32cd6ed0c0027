use thiserror::Error;

use crate::pipeline::CaptureState;

/// Structural errors returned by the capture manager's public operations.
///
/// Everything that goes wrong per frame, per record or per interface is
/// logged where it happens and never reaches the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture is already running")]
    AlreadyRunning,

    #[error("capture cannot start while {0}")]
    NotIdle(CaptureState),

    #[error("invalid capture configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn the persistence consumer: {0}")]
    Spawn(String),
}

/// Why a single frame could not be turned into a packet record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("truncated {layer} header ({len} bytes)")]
    Truncated { layer: &'static str, len: usize },

    #[error("unsupported link type {0}")]
    UnsupportedLink(i32),
}
