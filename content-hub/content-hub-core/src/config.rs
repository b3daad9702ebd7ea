//! Runtime configuration for resolution, caching, permissions and search.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::cache::DEFAULT_KEY_PREFIX;
use crate::error::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub permissions: PermissionConfig,
}

/// Persistent ancestor cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis URL. Without one only the process-local tier is used.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Key prefix, followed by the cache format version (default "doc-anc-")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

/// Scoped search widening
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Hits to aim for per search (default 50)
    #[serde(default = "default_desired_results")]
    pub desired_results: usize,

    /// Pages fetched per item kind before giving up (default 5)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Score multiplier for collection hits (default 1.5)
    #[serde(default = "default_collection_score_boost")]
    pub collection_score_boost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionConfig {
    /// Items checked per batch when filtering (default 100)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_key_prefix() -> String { DEFAULT_KEY_PREFIX.to_string() }
fn default_desired_results() -> usize { 50 }
fn default_max_iterations() -> usize { 5 }
fn default_collection_score_boost() -> f64 { 1.5 }
fn default_batch_size() -> usize { 100 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            desired_results: default_desired_results(),
            max_iterations: default_max_iterations(),
            collection_score_boost: default_collection_score_boost(),
        }
    }
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl HubConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: HubConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup, starting from the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = HubConfig::default();
        config.cache.redis_url = lookup("REDIS_URL");
        if let Some(prefix) = lookup("ANCESTOR_CACHE_PREFIX") {
            config.cache.key_prefix = prefix;
        }
        if let Some(value) = parse_var(&lookup, "SEARCH_DESIRED_RESULTS")? {
            config.search.desired_results = value;
        }
        if let Some(value) = parse_var(&lookup, "SEARCH_MAX_ITERATIONS")? {
            config.search.max_iterations = value;
        }
        if let Some(value) = parse_var(&lookup, "PERMISSION_BATCH_SIZE")? {
            config.permissions.batch_size = value;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| -> anyhow::Error {
            Error::InvalidConfig {
                message: message.to_string(),
            }
            .into()
        };
        if self.cache.key_prefix.is_empty() {
            return Err(invalid("cache.key_prefix must not be empty"));
        }
        if self.search.desired_results == 0 {
            return Err(invalid("search.desired_results must be at least 1"));
        }
        if self.search.max_iterations == 0 {
            return Err(invalid("search.max_iterations must be at least 1"));
        }
        let boost = self.search.collection_score_boost;
        if boost.is_nan() || boost <= 0.0 {
            return Err(invalid("search.collection_score_boost must be positive"));
        }
        if self.permissions.batch_size == 0 {
            return Err(invalid("permissions.batch_size must be at least 1"));
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| raw.trim().parse::<T>().with_context(|| format!("invalid {key}: {raw}")))
        .transpose()
}
