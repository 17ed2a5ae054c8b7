use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub dumpster: DumpsterConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
}

/// Security limits applied to an archive before anything is extracted.
#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    #[serde(default = "default_max_extracted_size")]
    pub max_extracted_size: u64,
    #[serde(default = "default_max_compression_ratio")]
    pub max_compression_ratio: u64,
    #[serde(default = "default_max_files_in_zip")]
    pub max_files_in_zip: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_size: default_max_upload_size(),
            max_extracted_size: default_max_extracted_size(),
            max_compression_ratio: default_max_compression_ratio(),
            max_files_in_zip: default_max_files_in_zip(),
        }
    }
}

fn default_max_upload_size() -> u64 {
    2 * 1024 * 1024 * 1024
}
fn default_max_extracted_size() -> u64 {
    2 * 1024 * 1024 * 1024
}
fn default_max_compression_ratio() -> u64 {
    100
}
fn default_max_files_in_zip() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaTransfer {
    #[default]
    Copy,
    Move,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DumpsterConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Where per-run scratch directories are created. Defaults to the
    /// system temp directory.
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
    #[serde(default)]
    pub media_transfer: MediaTransfer,
    #[serde(default)]
    pub preserve_original: bool,
}

impl Default for DumpsterConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            scratch_root: None,
            media_transfer: MediaTransfer::Copy,
            preserve_original: false,
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("./data/dumpsters")
}

impl DumpsterConfig {
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("chat-dumpster"))
    }

    pub fn dumpster_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LayoutConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub require_asset_index: bool,
    #[serde(default)]
    pub require_media: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            require_asset_index: false,
            require_media: false,
        }
    }
}

fn default_max_depth() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssetsConfig {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_cache_capacity() -> usize {
    1000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Load `path` when it exists, otherwise fall back to built-in defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!("no config at {}, using defaults", path.display());
        Ok(Config::default())
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        // Validate limits
        if self.limits.max_upload_size == 0 {
            anyhow::bail!("limits.max_upload_size must be > 0");
        }
        if self.limits.max_extracted_size == 0 {
            anyhow::bail!("limits.max_extracted_size must be > 0");
        }
        if self.limits.max_compression_ratio < 1 {
            anyhow::bail!("limits.max_compression_ratio must be >= 1");
        }
        if self.limits.max_files_in_zip == 0 {
            anyhow::bail!("limits.max_files_in_zip must be > 0");
        }

        // Validate dumpster
        if self.dumpster.root.as_os_str().is_empty() {
            anyhow::bail!("dumpster.root must not be empty");
        }

        if self.layout.max_depth == 0 {
            anyhow::bail!("layout.max_depth must be > 0");
        }
        if self.assets.cache_capacity == 0 {
            anyhow::bail!("assets.cache_capacity must be > 0");
        }
        Ok(())
    }
}
