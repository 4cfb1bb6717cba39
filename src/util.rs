//! # Utility Module
//!
//! Path handling, service wiring and small serde helpers shared across modules.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::Url;
use serde::{Deserialize, Deserializer};
use tracing::{info, warn};

use crate::catalog::{CodeCatalog, JsonCodeCatalog, StaticCatalog};
use crate::config::Config;
use crate::decoder::FfmpegDecoder;
use crate::inference::{ChatBackend, ChatClassifier, ChatVision, OllamaClient};
use crate::pipeline::PipelineServices;
use crate::plausibility::{CatalogPlausibility, NoopPlausibility, PlausibilityCheck};

/// Ensure output directory exists and is writable, warning on unsafe permissions.
pub fn ensure_output_dir(path: &Path) -> Result<()> {
    if path.exists() {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(anyhow!(
                "output path is not a directory: {}",
                path.display()
            ));
        }
    } else {
        std::fs::create_dir_all(path)?;
    }
    let metadata = std::fs::metadata(path)?;

    let probe_path = path.join(".sewerscan_write_probe");
    match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe_path)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe_path);
        }
        Err(err) => {
            return Err(anyhow!(
                "output directory is not writable: {} ({})",
                path.display(),
                err
            ));
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode();
        if mode & 0o002 != 0 {
            warn!("output directory is world-writable: {}", path.display());
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;

    Ok(())
}

/// Trim a user-supplied video location; `file://` URIs become local paths.
pub fn normalize_video_path(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim().trim_matches('"').trim();
    if trimmed.is_empty() {
        return None;
    }
    match Url::parse(trimmed) {
        Ok(url) if url.scheme() == "file" => {
            let path = url.to_file_path().ok()?;
            // `file://` and `file:///` name no file.
            path.file_name().is_some().then_some(path)
        }
        // Plain paths, including `C:\...` which parses with a one-letter scheme.
        _ => Some(PathBuf::from(trimmed)),
    }
}

/// Allowed codes from `--catalog` and/or `--codes`; both sources are merged.
pub fn build_catalog(
    codes: Option<&[String]>,
    catalog_path: Option<&Path>,
) -> Result<Arc<dyn CodeCatalog>> {
    let file_catalog = catalog_path
        .map(JsonCodeCatalog::load)
        .transpose()
        .context("failed to load code catalog")?;
    match (file_catalog, codes) {
        (Some(catalog), None) => {
            info!(
                "loaded {} codes from catalog version {}",
                catalog.allowed_codes().len(),
                catalog.version()
            );
            Ok(Arc::new(catalog))
        }
        (Some(catalog), Some(extra)) => {
            let mut merged = catalog.allowed_codes();
            merged.extend(extra.iter().cloned());
            Ok(Arc::new(StaticCatalog::new(merged)))
        }
        (None, codes) => Ok(Arc::new(StaticCatalog::new(codes.unwrap_or_default()))),
    }
}

/// Wire the ffmpeg decoder and the Ollama-backed inference adapters.
pub fn build_services(
    cfg: &Config,
    catalog: Arc<dyn CodeCatalog>,
    plausibility: bool,
) -> Result<PipelineServices> {
    let backend = OllamaClient::new(
        &cfg.inference.base_url,
        Duration::from_secs(cfg.inference.request_timeout_secs.max(1)),
    )
    .context("failed to build inference client")?;
    let backend: Arc<dyn ChatBackend> = Arc::new(backend);
    let plausibility: Arc<dyn PlausibilityCheck> = if plausibility {
        Arc::new(CatalogPlausibility)
    } else {
        Arc::new(NoopPlausibility)
    };
    Ok(PipelineServices {
        decoder: Arc::new(FfmpegDecoder::new(&cfg.decoder)),
        vision: Arc::new(ChatVision::new(
            backend.clone(),
            cfg.inference.vision_model.clone(),
        )),
        classifier: Arc::new(ChatClassifier::new(
            backend,
            cfg.inference.text_model.clone(),
        )),
        plausibility,
        catalog,
    })
}

/// Drop repeated entries (case-insensitively), keeping the first spelling.
pub fn dedupe_case_insensitive<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.trim().to_lowercase()))
        .collect()
}

/// Deserialize `null` as `T::default()`.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
