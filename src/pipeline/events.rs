//! # Pipeline Events
//!
//! Units of frame work and their outcomes as they move between threads.

use crate::analyzer::FrameAnalysis;

/// One sampling position to decode and analyse.
#[derive(Debug, Clone, Copy)]
pub struct FrameJob {
    pub index: u64,
    pub offset_seconds: f64,
}

#[derive(Debug)]
pub enum FrameResult {
    /// The decoder produced no image for this offset.
    DecodeFailed,
    /// Analysis ran; `FrameAnalysis::error` is set if the model call failed.
    Analysed(FrameAnalysis),
    /// The cancel flag was observed while working on this frame.
    Cancelled,
}

#[derive(Debug)]
pub struct FrameEvent {
    pub job: FrameJob,
    pub result: FrameResult,
}
