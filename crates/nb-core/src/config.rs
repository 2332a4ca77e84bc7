//! Configuration loading and validation for the batch CLI.
//!
//! Resolution order (highest to lowest priority):
//! 1. `--config <file>`
//! 2. `NB_BATCH_CONFIG`
//! 3. `$XDG_CONFIG_HOME/nb-batch/batch.json`
//! 4. `<platform config dir>/nb-batch/batch.json`
//! 5. Built-in defaults
//!
//! CLI flags are applied on top of whatever is loaded.

use crate::batch::{ExportPackageOptions, ExportPdfOptions, ImportOptions};
use crate::discovery::DiscoveryOptions;
use crate::queue::QueueConfig;
use crate::render::{MAX_DPI, MIN_DPI};
use nb_package::OverwritePolicy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Schema version accepted in `batch.json`.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

const CONFIG_DIR_NAME: &str = "nb-batch";
const CONFIG_FILE_NAME: &str = "batch.json";
const CONFIG_ENV: &str = "NB_BATCH_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("invalid JSON in config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported config schema version {actual} (expected {expected})")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfDefaults {
    pub dpi: u32,
    pub annotations_only: bool,
    pub include_metadata: bool,
    pub include_outline: bool,
}

impl Default for PdfDefaults {
    fn default() -> Self {
        Self {
            dpi: 150,
            annotations_only: false,
            include_metadata: true,
            include_outline: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageDefaults {
    pub include_pdf: bool,
}

impl Default for PackageDefaults {
    fn default() -> Self {
        Self { include_pdf: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportDefaults {
    pub overwrite_policy: OverwritePolicy,
    /// Destination when `--dest` is not given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryDefaults {
    pub recursive: bool,
    pub detect_all: bool,
}

/// Contents of `batch.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub schema_version: u32,
    /// Output directory when `--output` is not given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<PathBuf>,
    pub pdf: PdfDefaults,
    pub package: PackageDefaults,
    pub import: ImportDefaults,
    pub discovery: DiscoveryDefaults,
    pub queue: QueueConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            output_directory: None,
            pdf: PdfDefaults::default(),
            package: PackageDefaults::default(),
            import: ImportDefaults::default(),
            discovery: DiscoveryDefaults::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl BatchConfig {
    /// Semantic checks beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema_version != CONFIG_SCHEMA_VERSION {
            return Err(ConfigError::VersionMismatch {
                expected: CONFIG_SCHEMA_VERSION,
                actual: self.schema_version,
            });
        }
        if !(MIN_DPI..=MAX_DPI).contains(&self.pdf.dpi) {
            return Err(ConfigError::Invalid(format!(
                "pdf.dpi {} outside {MIN_DPI}..={MAX_DPI}",
                self.pdf.dpi
            )));
        }
        if self.queue.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue.event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pdf_options(&self) -> ExportPdfOptions {
        ExportPdfOptions {
            output: self.output_directory.clone(),
            dpi: self.pdf.dpi,
            annotations_only: self.pdf.annotations_only,
            include_metadata: self.pdf.include_metadata,
            include_outline: self.pdf.include_outline,
            ..Default::default()
        }
    }

    pub fn package_options(&self) -> ExportPackageOptions {
        ExportPackageOptions {
            output: self.output_directory.clone(),
            include_pdf: self.package.include_pdf,
            ..Default::default()
        }
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            destination: self.import.destination.clone(),
            overwrite_policy: self.import.overwrite_policy,
            dry_run: false,
        }
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions::default()
            .recursive(self.discovery.recursive)
            .detect_all(self.discovery.detect_all)
    }
}

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSource {
    /// File path, or `None` for built-in defaults.
    pub path: Option<PathBuf>,
    /// SHA-256 of the file content.
    pub sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: BatchConfig,
    pub source: ConfigSource,
}

/// Resolve and load the configuration.
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig, ConfigError> {
    load_config_with(explicit, |key| std::env::var(key).ok())
}

/// [`load_config`] with an explicit environment lookup.
pub fn load_config_with(
    explicit: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig, ConfigError> {
    // An explicitly named file must exist.
    let required = explicit
        .map(Path::to_path_buf)
        .or_else(|| env(CONFIG_ENV).filter(|v| !v.is_empty()).map(PathBuf::from));

    let path = match required {
        Some(path) => {
            if !path.is_file() {
                return Err(ConfigError::NotFound { path });
            }
            Some(path)
        }
        None => default_candidates(&env).into_iter().find(|p| p.is_file()),
    };

    let Some(path) = path else {
        debug!("Using built-in config defaults");
        return Ok(ResolvedConfig {
            config: BatchConfig::default(),
            source: ConfigSource {
                path: None,
                sha256: None,
            },
        });
    };

    let (config, sha256) = load_from_file(&path)?;
    debug!(path = %path.display(), sha256 = %sha256, "Loaded config");
    Ok(ResolvedConfig {
        config,
        source: ConfigSource {
            path: Some(path),
            sha256: Some(sha256),
        },
    })
}

fn default_candidates(env: &impl Fn(&str) -> Option<String>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(xdg) = env("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        candidates.push(PathBuf::from(xdg).join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    }
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    }
    candidates
}

fn load_from_file(path: &Path) -> Result<(BatchConfig, String), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let sha256 = hex::encode(Sha256::digest(content.as_bytes()));

    let config: BatchConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok((config, sha256))
}
