//! Configuration module for the IVF index.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `IVF_` and use double underscores
//! to separate nested levels:
//! - `IVF_INDEX__PROBE_WIDTH=8` sets `index.probe_width`
//! - `IVF_INDEX__LEVEL2_CLUSTERS=64` sets `index.level2_clusters`
//! - `IVF_STORAGE__CACHE_PAGES=1024` sets `storage.cache_pages`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{IvfError, IvfResult};
use crate::storage::DEFAULT_BLOCK_SIZE;
use crate::vector::{CONVERGENCE_TOLERANCE, DEFAULT_DIMENSION, DEFAULT_MAX_ITERATIONS};

const CONFIG_DIR: &str = ".ivfdb";
const CONFIG_FILE: &str = "settings.toml";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding table files and the catalog
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Workspace root directory (where .ivfdb is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Index training and probing
    #[serde(default)]
    pub index: IndexConfig,

    /// Record-file layer
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Vector dimension of every index
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Number of top-level partitions
    #[serde(default = "default_level1_clusters")]
    pub level1_clusters: usize,

    /// Leaf clusters per top-level partition
    #[serde(default = "default_level2_clusters")]
    pub level2_clusters: usize,

    /// Lloyd iteration budget per training run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Leaf clusters scanned per query
    #[serde(default = "default_probe_width")]
    pub probe_width: usize,

    /// Leaf clusters probed by the flat top-M search
    #[serde(default = "default_flat_probe_width")]
    pub flat_probe_width: usize,

    /// Cost change below which training stops early
    #[serde(default = "default_convergence_tolerance")]
    pub convergence_tolerance: f64,

    /// Seed for reproducible training
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Threads used to train level-2 partitions
    #[serde(default = "default_training_threads")]
    pub training_threads: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StorageConfig {
    /// Block size of table files in bytes
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Page-cache capacity in blocks
    #[serde(default = "default_cache_pages")]
    pub cache_pages: usize,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(".ivfdb/data")
}
fn default_false() -> bool {
    false
}
fn default_dimension() -> usize {
    DEFAULT_DIMENSION
}
fn default_level1_clusters() -> usize {
    10
}
fn default_level2_clusters() -> usize {
    200
}
fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}
fn default_probe_width() -> usize {
    2
}
fn default_flat_probe_width() -> usize {
    20
}
fn default_convergence_tolerance() -> f64 {
    CONVERGENCE_TOLERANCE
}
fn default_training_threads() -> usize {
    num_cpus::get()
}
fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}
fn default_cache_pages() -> usize {
    16_384
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            data_dir: default_data_dir(),
            workspace_root: None,
            debug: false,
            index: IndexConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            level1_clusters: default_level1_clusters(),
            level2_clusters: default_level2_clusters(),
            max_iterations: default_max_iterations(),
            probe_width: default_probe_width(),
            flat_probe_width: default_flat_probe_width(),
            convergence_tolerance: default_convergence_tolerance(),
            seed: None,
            training_threads: default_training_threads(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            cache_pages: default_cache_pages(),
        }
    }
}

impl IndexConfig {
    /// Rejects settings no build or query can run with.
    pub fn validate(&self) -> IvfResult<()> {
        let checks = [
            (self.dimension, "index.dimension"),
            (self.level1_clusters, "index.level1_clusters"),
            (self.level2_clusters, "index.level2_clusters"),
            (self.max_iterations, "index.max_iterations"),
            (self.probe_width, "index.probe_width"),
            (self.flat_probe_width, "index.flat_probe_width"),
        ];
        if let Some((_, name)) = checks.iter().find(|(value, _)| *value == 0) {
            return Err(IvfError::Config {
                reason: format!("{name} must be at least 1"),
            });
        }
        if self.convergence_tolerance.is_nan() || self.convergence_tolerance < 0.0 {
            return Err(IvfError::Config {
                reason: "index.convergence_tolerance must be a non-negative number".to_string(),
            });
        }
        Ok(())
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| Path::new(CONFIG_DIR).join(CONFIG_FILE));

        Self::figment(config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref().to_path_buf())
            .extract()
            .map_err(Box::new)
    }

    fn figment(config_path: PathBuf) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels; single underscores
            // stay inside field names
            .merge(Env::prefixed("IVF_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the workspace config by looking for a .ivfdb directory
    /// from the current directory up to the root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Get the workspace root directory (where .ivfdb is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Data directory resolved against the workspace root
    #[must_use]
    pub fn resolved_data_dir(&self) -> PathBuf {
        match &self.workspace_root {
            Some(root) if self.data_dir.is_relative() => root.join(&self.data_dir),
            _ => self.data_dir.clone(),
        }
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = Path::new(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = format!(
            r#"# ivfdb Configuration File

# Version of the configuration schema
version = 1

# Directory for table files and the catalog (relative to workspace root)
data_dir = ".ivfdb/data"

# Global debug mode
debug = false

[index]
# Vector dimension of every index
dimension = {DEFAULT_DIMENSION}

# Top-level partitions, and leaf clusters inside each of them
level1_clusters = 10
level2_clusters = 200

# Lloyd iteration budget and early-stop threshold per training run
max_iterations = {DEFAULT_MAX_ITERATIONS}
convergence_tolerance = 1e-6

# Leaf clusters scanned per query (recall vs latency)
probe_width = 2

# Leaf clusters probed by 'ivfdb search --flat'
flat_probe_width = 20

# Fix the seed to make training reproducible
# seed = 42

# Threads used for level-2 training (defaults to CPU count)
# training_threads = {}

[storage]
# Block size of table files in bytes
block_size = {DEFAULT_BLOCK_SIZE}

# Page-cache capacity in blocks, used by 'ivfdb preload'
cache_pages = 16384
"#,
            num_cpus::get()
        );

        std::fs::write(&config_path, template)?;

        if force {
            println!("Overwrote configuration at: {}", config_path.display());
        } else {
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
        }

        Ok(config_path)
    }
}
