//! Loader configuration with TOML persistence
//!
//! The user configuration lives at `~/.config/contentdb/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ContentError;
use crate::manifest::DEFAULT_MANIFEST_FILE;

/// Runtime settings for manifest discovery and the load pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Directory holding the manifest and the archive files
    pub content_dir: PathBuf,
    /// Manifest file name inside `content_dir`
    pub manifest_file: String,
    /// Bytes read per scheduling tick while opening an archive
    pub read_chunk_size: usize,
    /// Give up on an archive open after this many milliseconds (no limit when unset)
    pub open_timeout_ms: Option<u64>,
    /// Scheduling ticks spent extracting one payload
    pub extract_ticks: u32,
    /// Log per-tick progress at debug level
    pub log_progress: bool,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from("Content"),
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
            read_chunk_size: 64 * 1024,
            open_timeout_ms: None,
            extract_ticks: 2,
            log_progress: true,
        }
    }
}

impl ContentConfig {
    /// Default settings rooted at `content_dir`.
    pub fn with_content_dir(content_dir: impl Into<PathBuf>) -> Self {
        Self {
            content_dir: content_dir.into(),
            ..Self::default()
        }
    }

    /// Full path of the manifest file.
    pub fn manifest_path(&self) -> PathBuf {
        self.content_dir.join(&self.manifest_file)
    }

    pub fn open_timeout(&self) -> Option<Duration> {
        self.open_timeout_ms.map(Duration::from_millis)
    }

    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("contentdb"))
    }

    /// Path of the per-user config file
    pub fn user_config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Read settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ContentError> {
        let content =
            fs::read_to_string(path).map_err(|e| ContentError::Io(path.to_path_buf(), e))?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| ContentError::Config(path.to_path_buf(), e.to_string()))?;
        info!("Loaded content config from {:?}", path);
        Ok(config)
    }

    /// Load the per-user config, or return defaults if missing or unreadable.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::user_config_path() else {
            warn!("Could not determine config directory");
            return Self::default();
        };

        if !path.exists() {
            info!("No content config found, using defaults");
            return Self::default();
        }

        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }
}
