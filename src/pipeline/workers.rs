//! # Pipeline Workers
//!
//! Frame extraction and analysis on a bounded worker pool, plus the
//! reorder buffer that hands results back to the tracker in timestamp order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::analyzer::FrameAnalyzer;
use crate::cancel::{Cancelled, check, is_cancelled};
use crate::decoder::Decoder;

use super::events::{FrameEvent, FrameJob, FrameResult};

/// Decode and analyse one frame on the calling thread.
pub fn process_frame(
    decoder: &dyn Decoder,
    analyzer: &FrameAnalyzer,
    video: &Path,
    job: FrameJob,
    cancel: &AtomicBool,
) -> FrameEvent {
    let result = match run_frame(decoder, analyzer, video, job, cancel) {
        Ok(result) => result,
        Err(Cancelled) => FrameResult::Cancelled,
    };
    FrameEvent { job, result }
}

fn run_frame(
    decoder: &dyn Decoder,
    analyzer: &FrameAnalyzer,
    video: &Path,
    job: FrameJob,
    cancel: &AtomicBool,
) -> Result<FrameResult, Cancelled> {
    check(cancel)?;
    let Some(image) = decoder.extract_frame(video, job.offset_seconds, cancel)? else {
        debug!("no image at {:.2}s", job.offset_seconds);
        return Ok(FrameResult::DecodeFailed);
    };
    check(cancel)?;
    Ok(FrameResult::Analysed(analyzer.analyze(&image, cancel)?))
}

/// Push every job into the bounded queue, stopping early on cancel.
pub fn spawn_feeder<I>(
    jobs: I,
    tx: Sender<FrameJob>,
    cancel: Arc<AtomicBool>,
) -> thread::JoinHandle<()>
where
    I: IntoIterator<Item = FrameJob> + Send + 'static,
{
    thread::spawn(move || {
        for job in jobs {
            if is_cancelled(&cancel) {
                break;
            }
            if tx.send(job).is_err() {
                debug!("frame queue closed at job {}", job.index);
                break;
            }
        }
    })
}

/// Spawn frame worker threads
pub fn spawn_frame_workers(
    workers: usize,
    decoder: Arc<dyn Decoder>,
    analyzer: Arc<FrameAnalyzer>,
    video: PathBuf,
    rx: Receiver<FrameJob>,
    tx: Sender<FrameEvent>,
    cancel: Arc<AtomicBool>,
) -> Vec<thread::JoinHandle<()>> {
    let mut handles = Vec::new();
    let worker_count = workers.max(1);

    for _ in 0..worker_count {
        let decoder = decoder.clone();
        let analyzer = analyzer.clone();
        let video = video.clone();
        let rx = rx.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();

        handles.push(thread::spawn(move || {
            for job in rx {
                let event = process_frame(decoder.as_ref(), &analyzer, &video, job, &cancel);
                let stop = matches!(event.result, FrameResult::Cancelled);
                if let Err(err) = tx.send(event) {
                    warn!("result channel closed while sending frame {}: {err}", job.index);
                    break;
                }
                if stop {
                    break;
                }
            }
        }));
    }

    handles
}

/// Releases frame events strictly in index order.
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    next: u64,
    pending: BTreeMap<u64, FrameEvent>,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: FrameEvent) {
        self.pending.insert(event.job.index, event);
    }

    /// Next in-order event, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<FrameEvent> {
        let event = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(event)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Release every index below `end` in order, filling gaps with
    /// [`FrameResult::DecodeFailed`] at `offset_of(index)`.
    pub fn drain_through<F>(&mut self, end: u64, offset_of: F) -> Vec<FrameEvent>
    where
        F: Fn(u64) -> f64,
    {
        let mut events = Vec::new();
        while self.next < end {
            let index = self.next;
            let event = self.pending.remove(&index).unwrap_or_else(|| FrameEvent {
                job: FrameJob {
                    index,
                    offset_seconds: offset_of(index),
                },
                result: FrameResult::DecodeFailed,
            });
            events.push(event);
            self.next += 1;
        }
        events
    }
}
