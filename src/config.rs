use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::network::MAX_HOPS;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// SQLite store location
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Directory of versioned `NNN_name.sql` files. The embedded set is used
    /// when unset.
    #[serde(default)]
    pub migrations_dir: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            migrations_dir: None,
        }
    }
}

/// Discovery and orchestration settings
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_max_hops")]
    pub default_max_hops: u8,
    /// Results with more entities than this are flagged as truncated.
    #[serde(default = "default_entity_cap")]
    pub entity_cap: usize,
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub include_kinship: bool,
    #[serde(default = "default_true")]
    pub include_association: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            default_max_hops: default_max_hops(),
            entity_cap: default_entity_cap(),
            provider_timeout_ms: default_provider_timeout_ms(),
            include_kinship: true,
            include_association: true,
        }
    }
}

/// Graph cache sizing
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("relnet.db")
}

fn default_max_hops() -> u8 {
    1
}

fn default_entity_cap() -> usize {
    5000
}

fn default_provider_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    crate::cache::DEFAULT_CAPACITY
}

fn default_cache_ttl_secs() -> u64 {
    crate::cache::DEFAULT_TTL.as_secs()
}

impl Config {
    /// Load configuration
    ///
    /// Loads `.env` (if present) first. Looks for the file in this order:
    /// 1. Path in the RELNET_CONFIG environment variable (must exist)
    /// 2. ./relnet.toml in the current directory
    ///
    /// Falls back to defaults when neither is present.
    pub fn load() -> Result<Self> {
        let _ = dotenv::dotenv();

        if let Ok(path) = std::env::var("RELNET_CONFIG") {
            return Self::load_from(Path::new(&path));
        }
        let local = PathBuf::from("relnet.toml");
        if local.exists() {
            return Self::load_from(&local);
        }
        log::debug!("No relnet.toml found, using default configuration");
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).context("Failed to parse relnet config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.network.default_max_hops > MAX_HOPS {
            anyhow::bail!(
                "network.default_max_hops must be at most {}, got {}",
                MAX_HOPS,
                self.network.default_max_hops
            );
        }
        if self.network.entity_cap == 0 {
            anyhow::bail!("network.entity_cap must be greater than 0");
        }
        if self.network.provider_timeout_ms == 0 {
            anyhow::bail!("network.provider_timeout_ms must be greater than 0");
        }
        if !self.network.include_kinship && !self.network.include_association {
            anyhow::bail!(
                "at least one of network.include_kinship / include_association must be true"
            );
        }
        if self.cache.capacity == 0 {
            anyhow::bail!("cache.capacity must be greater than 0");
        }
        if self.cache.ttl_secs == 0 {
            anyhow::bail!("cache.ttl_secs must be greater than 0");
        }
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.database.db_path
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.network.provider_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}
