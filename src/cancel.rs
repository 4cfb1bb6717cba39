//! Cooperative cancellation shared by every stage of a run.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// Returned by any stage that observed the cancel flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

pub fn is_cancelled(flag: &AtomicBool) -> bool {
    flag.load(Ordering::Relaxed)
}

/// Fail fast with [`Cancelled`] if the flag is set.
pub fn check(flag: &AtomicBool) -> Result<(), Cancelled> {
    if is_cancelled(flag) {
        Err(Cancelled)
    } else {
        Ok(())
    }
}
