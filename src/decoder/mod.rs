//! # Decoder
//!
//! Frame extraction and duration probing through an external decoder.

pub mod ffmpeg;
pub mod process;

use std::path::Path;
use std::sync::atomic::AtomicBool;

use thiserror::Error;

use crate::cancel::Cancelled;

pub use ffmpeg::FfmpegDecoder;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("video not found: {0}")]
    VideoNotFound(String),
    #[error("duration unavailable (probe: {probe}; fallback: {fallback})")]
    DurationUnavailable { probe: String, fallback: String },
    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for DecodeError {
    fn from(_: Cancelled) -> Self {
        DecodeError::Cancelled
    }
}

/// Decoder capability consumed by the pipeline.
pub trait Decoder: Send + Sync {
    /// Decode one still image at `offset_seconds`.
    ///
    /// Any decode failure is `Ok(None)`; only cancellation is an error.
    fn extract_frame(
        &self,
        video: &Path,
        offset_seconds: f64,
        cancel: &AtomicBool,
    ) -> Result<Option<Vec<u8>>, Cancelled>;

    /// Total playable duration in seconds.
    fn probe_duration(&self, video: &Path, cancel: &AtomicBool) -> Result<f64, DecodeError>;
}
