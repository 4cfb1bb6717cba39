//! Meter position per frame: on-screen reading first, time-based estimate second.

use serde::Serialize;

use crate::config::MeterConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MeterSource {
    /// Read from the video overlay by the vision model.
    Osd,
    /// Interpolated from the frame timestamp.
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterReading {
    pub value: f64,
    pub source: MeterSource,
}

#[derive(Debug, Clone)]
pub struct MeterEstimator {
    duration_seconds: f64,
    linear_span_m: f64,
    plausible_min_m: f64,
    plausible_max_m: f64,
}

impl MeterEstimator {
    pub fn new(duration_seconds: f64, cfg: &MeterConfig) -> Self {
        Self {
            duration_seconds,
            linear_span_m: cfg.linear_span_m,
            plausible_min_m: cfg.plausible_min_m,
            plausible_max_m: cfg.plausible_max_m,
        }
    }

    pub fn is_plausible(&self, meter: f64) -> bool {
        meter.is_finite() && meter >= self.plausible_min_m && meter <= self.plausible_max_m
    }

    /// `round(t / duration * span, 2)`; zero for a degenerate duration.
    pub fn linear(&self, time_seconds: f64) -> f64 {
        if !(self.duration_seconds.is_finite() && self.duration_seconds > 0.0) {
            return 0.0;
        }
        let raw = time_seconds / self.duration_seconds * self.linear_span_m;
        (raw * 100.0).round() / 100.0
    }

    pub fn resolve(&self, vision_meter: Option<f64>, time_seconds: f64) -> MeterReading {
        match vision_meter {
            Some(value) if self.is_plausible(value) => MeterReading {
                value,
                source: MeterSource::Osd,
            },
            _ => MeterReading {
                value: self.linear(time_seconds),
                source: MeterSource::Linear,
            },
        }
    }
}
