use std::time::Duration;

/// How often blocking waits re-check the cancel flag.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub const CHANNEL_CAPACITY_MULTIPLIER: usize = 2;
pub const MIN_CHANNEL_CAPACITY: usize = 4;

pub const SEVERITY_MIN: u8 = 1;
pub const SEVERITY_MAX: u8 = 5;

/// Confidence lost when a suggested code is not in the allowed catalog.
pub const UNKNOWN_CODE_PENALTY: f64 = 0.3;

/// Upper bound for a single section length; longer ranges are flagged.
pub const MAX_SECTION_LENGTH_M: f64 = 2000.0;

/// Maximum bytes of a remote error body kept in error messages.
pub const ERROR_BODY_LIMIT: usize = 512;
