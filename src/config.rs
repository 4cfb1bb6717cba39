use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use sha2::{Digest, Sha256};

pub const ENV_ENABLED: &str = "SEWERSCAN_AI_ENABLED";
pub const ENV_OLLAMA_URL: &str = "SEWERSCAN_OLLAMA_URL";
pub const ENV_VISION_MODEL: &str = "SEWERSCAN_VISION_MODEL";
pub const ENV_TEXT_MODEL: &str = "SEWERSCAN_TEXT_MODEL";
pub const ENV_FFMPEG: &str = "SEWERSCAN_FFMPEG";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MeterConfig {
    /// Pipe length assumed by the time-based estimate.
    pub linear_span_m: f64,
    pub plausible_min_m: f64,
    pub plausible_max_m: f64,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            linear_span_m: 100.0,
            plausible_min_m: 0.0,
            plausible_max_m: 500.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DecoderConfig {
    pub ffmpeg_path: String,
    /// Derived from `ffmpeg_path` when unset.
    pub ffprobe_path: Option<String>,
    pub max_frame_width: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: None,
            max_frame_width: 1280,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InferenceConfig {
    pub base_url: String,
    pub vision_model: String,
    pub text_model: String,
    pub request_timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            vision_model: "qwen2.5vl:7b".to_string(),
            text_model: "qwen2.5:7b".to_string(),
            request_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub run_id: String,
    pub enabled: bool,
    pub frame_step_seconds: f64,
    pub dedup_window_frames: u32,
    pub min_severity: u8,
    pub frame_workers: usize,
    pub high_confidence_threshold: f64,
    pub meter: MeterConfig,
    pub decoder: DecoderConfig,
    pub inference: InferenceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run_id: String::new(),
            enabled: true,
            frame_step_seconds: 2.0,
            dedup_window_frames: 3,
            min_severity: 1,
            frame_workers: 1,
            high_confidence_threshold: 0.75,
            meter: MeterConfig::default(),
            decoder: DecoderConfig::default(),
            inference: InferenceConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !self.frame_step_seconds.is_finite() || self.frame_step_seconds <= 0.0 {
            bail!(
                "frame_step_seconds must be a positive number, got {}",
                self.frame_step_seconds
            );
        }
        if self.dedup_window_frames == 0 {
            bail!("dedup_window_frames must be at least 1");
        }
        if !(1..=5).contains(&self.min_severity) {
            bail!("min_severity must be within 1..=5, got {}", self.min_severity);
        }
        if self.frame_workers == 0 {
            bail!("frame_workers must be at least 1");
        }
        if self.meter.plausible_min_m > self.meter.plausible_max_m {
            bail!(
                "meter range is inverted: {} > {}",
                self.meter.plausible_min_m,
                self.meter.plausible_max_m
            );
        }
        if !(0.0..=1.0).contains(&self.high_confidence_threshold) {
            bail!(
                "high_confidence_threshold must be within 0..=1, got {}",
                self.high_confidence_threshold
            );
        }
        Ok(())
    }

    /// Apply `SEWERSCAN_*` overrides. `lookup` is `std::env::var` in production.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_ENABLED) {
            self.enabled = matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(url) = non_blank(lookup(ENV_OLLAMA_URL)) {
            self.inference.base_url = url;
        }
        if let Some(model) = non_blank(lookup(ENV_VISION_MODEL)) {
            self.inference.vision_model = model;
        }
        if let Some(model) = non_blank(lookup(ENV_TEXT_MODEL)) {
            self.inference.text_model = model;
        }
        if let Some(path) = non_blank(lookup(ENV_FFMPEG)) {
            self.decoder.ffmpeg_path = path;
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p).with_context(|| format!("failed to read config {}", p.display()))?
    } else {
        include_bytes!("../config/default.yml").to_vec()
    };

    let mut config: Config = serde_yaml::from_slice(&bytes)?;
    if config.run_id.trim().is_empty() {
        config.run_id = generate_run_id();
    }

    let config_hash = hash_bytes(&bytes);

    Ok(LoadedConfig { config, config_hash })
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(digest)
}

fn generate_run_id() -> String {
    let now = chrono::Utc::now();
    format!("{}_{}", now.format("%Y%m%dT%H%M%SZ"), rand_suffix())
}

fn rand_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{:08x}", nanos)
}
