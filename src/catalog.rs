//! # Code Catalog
//!
//! The fixed set of defect codes a suggestion may use. A catalog is read
//! once per run and never changes while the run is in flight.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::util::null_as_default;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid catalog json: {0}")]
    Parse(#[from] serde_json::Error),
}

pub trait CodeCatalog: Send + Sync {
    /// Sorted, de-duplicated, upper-case codes.
    fn allowed_codes(&self) -> Vec<String>;
}

/// Canonical spelling of a code: trimmed and upper-cased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Codes supplied directly, e.g. from the command line.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    codes: Vec<String>,
}

impl StaticCatalog {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut codes: Vec<String> = codes
            .into_iter()
            .map(|c| normalize_code(c.as_ref()))
            .filter(|c| !c.is_empty())
            .collect();
        codes.sort();
        codes.dedup();
        Self { codes }
    }
}

impl CodeCatalog for StaticCatalog {
    fn allowed_codes(&self) -> Vec<String> {
        self.codes.clone()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(default, deserialize_with = "null_as_default")]
    pub code: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    codes: Vec<CatalogEntry>,
}

/// Catalog document `{ "version": 1, "codes": [{ "code": "BAB", "title": ... }] }`.
#[derive(Debug, Clone)]
pub struct JsonCodeCatalog {
    version: u32,
    entries: Vec<CatalogEntry>,
    codes: Vec<String>,
    warnings: Vec<String>,
}

impl JsonCodeCatalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::from_json_str(&text)?;
        for warning in &catalog.warnings {
            warn!("catalog {}: {warning}", path.display());
        }
        Ok(catalog)
    }

    pub fn from_json_str(text: &str) -> Result<Self, CatalogError> {
        let doc: CatalogDocument = serde_json::from_str(text)?;
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(doc.codes.len());
        let mut warnings = Vec::new();
        for mut entry in doc.codes {
            entry.code = normalize_code(&entry.code);
            if entry.code.is_empty() {
                warnings.push("skipped entry with blank code".to_string());
                continue;
            }
            if !seen.insert(entry.code.clone()) {
                warnings.push(format!("duplicate code {} ignored", entry.code));
                continue;
            }
            entry.title = entry.title.trim().to_string();
            entries.push(entry);
        }
        entries.sort_by(|a, b| a.code.cmp(&b.code));
        let codes = entries.iter().map(|e| e.code.clone()).collect();
        Ok(Self {
            version: doc.version.unwrap_or(1),
            entries,
            codes,
            warnings,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn get(&self, code: &str) -> Option<&CatalogEntry> {
        let wanted = normalize_code(code);
        self.entries.iter().find(|e| e.code == wanted)
    }
}

impl CodeCatalog for JsonCodeCatalog {
    fn allowed_codes(&self) -> Vec<String> {
        self.codes.clone()
    }
}
