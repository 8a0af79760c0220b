//! Configuration loading from TOML files

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tcgharvest_store::{BlobStore, FsStore, Prefixed};

use crate::iter::DEFAULT_ITER_PARALLEL;

/// Top-level harvester configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HarvestConfig {
    pub store: StoreConfig,
    pub fetch: FetchConfig,
    pub extract: ExtractConfig,
    pub discovery: DiscoveryConfig,
    pub health: HealthConfig,
    /// Per-source overrides keyed by source name (e.g. `mtgtop8`)
    pub sources: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub root: PathBuf,
    /// Key prefix for canonical collections
    pub games_prefix: String,
    /// Key prefix for cached fetch responses
    pub scraper_prefix: String,
    /// Key prefix for discovery, health and dedup state
    pub state_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data"),
            games_prefix: "games".to_string(),
            scraper_prefix: "scraper".to_string(),
            state_prefix: "state".to_string(),
        }
    }
}

/// The three views of one filesystem root.
#[derive(Clone)]
pub struct Stores {
    pub games: Arc<dyn BlobStore>,
    pub scraper: Arc<dyn BlobStore>,
    pub state: Arc<dyn BlobStore>,
}

impl StoreConfig {
    /// Open `root`, creating it if needed, and split it by prefix.
    pub fn open(&self) -> Result<Stores> {
        let root = Arc::new(
            FsStore::new(&self.root)
                .with_context(|| format!("failed to open store at {}", self.root.display()))?,
        );
        let view = |prefix: &str| -> Arc<dyn BlobStore> { Arc::new(Prefixed::new(root.clone(), prefix)) };
        Ok(Stores {
            games: view(&self.games_prefix),
            scraper: view(&self.scraper_prefix),
            state: view(&self.state_prefix),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Default token bucket, `"<n>/<duration>"` or `"none"`
    pub rate_limit: String,
    pub max_body_bytes: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Live requests allowed in flight at once across all workers
    pub max_in_flight: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            rate_limit: "100/1m".to_string(),
            max_body_bytes: 10 * 1024 * 1024,
            max_attempts: 7,
            base_delay_ms: 1000,
            connect_timeout_secs: 30,
            request_timeout_secs: 60,
            max_in_flight: 32,
            user_agent: concat!("tcgharvest/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Default worker count for `Extract`
    pub parallel: usize,
    /// Default worker count for `IterItems`
    pub iter_parallel: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            parallel: 128,
            iter_parallel: DEFAULT_ITER_PARALLEL,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// A previous run newer than this resumes instead of restarting at page 1
    pub freshness_minutes: i64,
    pub max_pages_to_skip: u32,
    pub max_consecutive_known: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            freshness_minutes: 60,
            max_pages_to_skip: 3,
            max_consecutive_known: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub stale_after_days: i64,
    pub low_freshness: f64,
    pub mid_freshness: f64,
    /// Errors per 1000 records
    pub max_error_rate: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stale_after_days: 30,
            low_freshness: 0.1,
            mid_freshness: 0.5,
            max_error_rate: 50.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SourceConfig {
    pub rate_limit: Option<String>,
    /// Regex matched against 200 bodies that are really throttling pages
    pub silent_throttle: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub api_key: Option<String>,
}

/// Deserialize a string that may be an environment reference like `${VAR}`
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl HarvestConfig {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./tcgharvest.toml
    /// 2. ~/.config/tcgharvest/config.toml
    ///
    /// Falls back to defaults when neither exists.
    pub fn load() -> Result<Self> {
        let local = PathBuf::from("tcgharvest.toml");
        if local.exists() {
            return Self::from_file(&local);
        }

        if let Some(dirs) = directories::ProjectDirs::from("", "", "tcgharvest") {
            let user = dirs.config_dir().join("config.toml");
            if user.exists() {
                return Self::from_file(&user);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Settings for one source, defaulted when not configured.
    pub fn source(&self, name: &str) -> SourceConfig {
        self.sources.get(name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = HarvestConfig::default();
        assert_eq!(c.store.root, PathBuf::from("./data"));
        assert_eq!(c.fetch.max_body_bytes, 10 * 1024 * 1024);
        assert_eq!(c.fetch.max_attempts, 7);
        assert_eq!(c.extract.parallel, 128);
        assert_eq!(c.extract.iter_parallel, 64);
        assert_eq!(c.discovery.max_pages_to_skip, 3);
        assert_eq!(c.health.low_freshness, 0.1);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = HarvestConfig::from_toml(
            r#"
            [fetch]
            rate_limit = "10/1s"

            [sources.mtgtop8]
            rate_limit = "30/1m"
            silent_throttle = "(?i)too many requests"
            "#,
        )
        .unwrap();
        assert_eq!(c.fetch.rate_limit, "10/1s");
        assert_eq!(c.fetch.max_attempts, 7);
        let src = c.source("mtgtop8");
        assert_eq!(src.rate_limit.as_deref(), Some("30/1m"));
        assert!(src.silent_throttle.is_some());
        assert!(c.source("unknown").rate_limit.is_none());
    }

    #[test]
    fn env_var_expansion() {
        assert_eq!(expand_env_var("plain"), Some("plain".to_string()));
        assert_eq!(expand_env_var("${TCGHARVEST_SURELY_UNSET_VAR}"), None);
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tcgharvest.toml");
        std::fs::write(&path, "[extract]\nparallel = 8\n").unwrap();
        let c = HarvestConfig::from_file(&path).unwrap();
        assert_eq!(c.extract.parallel, 8);
    }

    #[test]
    fn store_views_split_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            root: dir.path().to_path_buf(),
            ..StoreConfig::default()
        };
        let stores = config.open().unwrap();
        stores.games.write("magic/mtgtop8/1.json", b"{}").unwrap();
        stores.state.write("discovery/mtgtop8.json", b"{}").unwrap();

        assert!(dir.path().join("games/magic/mtgtop8/1.json").exists());
        assert!(dir.path().join("state/discovery/mtgtop8.json").exists());
        assert!(!stores.scraper.exists("magic/mtgtop8/1.json").unwrap());
        let keys: Vec<_> = stores.games.list("").collect::<Result<_, _>>().unwrap();
        assert_eq!(keys, vec!["magic/mtgtop8/1.json".to_string()]);
    }

    #[test]
    fn invalid_toml_errors() {
        assert!(HarvestConfig::from_toml("[fetch\n").is_err());
    }
}
