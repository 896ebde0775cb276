//! # Configuration
//!
//! `Config` holds the small set of keys the engine reads at startup (spec
//! §3): allowed tool versions, cache sizing, logging defaults, and SSH
//! defaults. Loaded from YAML through the `ConfigProvider` trait so tests
//! can substitute an in-memory provider instead of touching disk, the same
//! seam the teacher uses for `Context::with_config` /
//! `bootstrap_v2::context::Config`.

use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::context::KnownHostsPolicy;

/// Cache sizing knobs (`cache.*` in YAML).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of cached `CommandResult`s before LRU eviction.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// Seconds a cached entry remains fresh.
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

fn default_cache_capacity() -> usize {
    256
}

fn default_cache_ttl() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_seconds: default_cache_ttl(),
        }
    }
}

/// Logging defaults (`logging.*` in YAML).
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when `MANCER_LOG_LEVEL` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional path to mirror log output into, in addition to stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// SSH defaults (`ssh.*` in YAML), overridable per `RemoteTarget`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SshConfig {
    /// Default host-key verification policy.
    #[serde(default, deserialize_with = "deserialize_known_hosts_policy")]
    pub known_hosts_policy: KnownHostsPolicy,
    /// Default private key path when a `RemoteTarget` doesn't specify one.
    #[serde(default)]
    pub default_key_path: Option<PathBuf>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            known_hosts_policy: KnownHostsPolicy::Strict,
            default_key_path: None,
        }
    }
}

fn deserialize_known_hosts_policy<'de, D>(deserializer: D) -> Result<KnownHostsPolicy, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    KnownHostsPolicy::parse(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("unrecognized known_hosts_policy: {raw}"))
    })
}

/// Top-level configuration document (spec §3's recognized YAML keys).
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct Config {
    /// Per-tool semver constraint strings consulted by the version
    /// registry before falling back to "any detected version" (spec §4.5).
    #[serde(default)]
    pub allowed_versions: HashMap<String, String>,
    /// Cache sizing.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Logging defaults.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// SSH defaults.
    #[serde(default)]
    pub ssh: SshConfig,
}

impl Config {
    /// Apply the `MANCER_CACHE_DISABLE` / `MANCER_LOG_LEVEL` environment
    /// overlays on top of a loaded document (spec §3).
    pub fn apply_env_overlay(mut self) -> Self {
        if env::var("MANCER_CACHE_DISABLE").is_ok() {
            self.cache.capacity = 0;
        }
        if let Ok(level) = env::var("MANCER_LOG_LEVEL") {
            self.logging.level = level;
        }
        self
    }

    /// Whether caching is disabled outright by configuration.
    pub fn cache_disabled(&self) -> bool {
        self.cache.capacity == 0
    }
}

/// Abstracts over where a `Config` document comes from, so unit tests never
/// need a real file on disk.
pub trait ConfigProvider {
    /// Load and parse the configuration document.
    fn load(&self) -> Result<Config, ConfigError>;
}

/// Failure loading or parsing a configuration document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configured path could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The document's contents were not valid YAML for `Config`.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Reads `Config` from a YAML file on disk.
///
/// `MANCER_CONFIG_PATH` overrides the path passed to `new`, matching how
/// the teacher's CLI lets environment variables override flag defaults
/// (`bootstrap_v2::cli`'s `#[arg(env = "...")]` fields).
pub struct YamlFileConfigProvider {
    path: PathBuf,
}

impl YamlFileConfigProvider {
    /// Use `path` unless `MANCER_CONFIG_PATH` is set in the environment.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = env::var("MANCER_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| path.into());
        Self { path }
    }

    /// Path this provider will read from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for YamlFileConfigProvider {
    fn load(&self) -> Result<Config, ConfigError> {
        if !self.path.exists() {
            return Ok(Config::default());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&raw)?;
        Ok(config)
    }
}

/// Test/embedding-friendly provider that returns a fixed document.
pub struct StaticConfigProvider(pub Config);

impl ConfigProvider for StaticConfigProvider {
    fn load(&self) -> Result<Config, ConfigError> {
        Ok(self.0.clone())
    }
}
