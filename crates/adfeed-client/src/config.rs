use adfeed_cache::cache::{DEFAULT_CAPACITY, DEFAULT_EXPIRATION};
use adfeed_cache::fetch::DEFAULT_RETRY_DELAYS_MS;
use adfeed_cache::request::DEFAULT_ENDPOINT;
use adfeed_cache::response::ParseOptions;
use adfeed_cache::{CacheSettings, PlacementKey, PlacementSpec};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid endpoint {endpoint:?}: {source}")]
    Endpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything a feed controller needs, loadable from TOML.
///
/// ```toml
/// [placement]
/// key = "feed_top"
/// initial_positions = [3]
/// repeat_interval = 10
///
/// [request]
/// params = { gender = "f" }
/// debug = true
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    pub placement: PlacementConfig,
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlacementConfig {
    pub key: String,
    #[serde(default = "default_initial_positions")]
    pub initial_positions: Vec<usize>,
    /// Zero places ads at the initial positions only.
    #[serde(default = "default_repeat_interval")]
    pub repeat_interval: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_downgrade_image_scheme")]
    pub downgrade_image_scheme: bool,
    #[serde(default)]
    pub default_logo_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_expiration_seconds")]
    pub expiration_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_delays_ms")]
    pub delays_ms: Vec<u64>,
}

impl ControllerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: ControllerConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults for everything but the placement key.
    pub fn default_for(key: impl Into<String>) -> Self {
        ControllerConfig {
            placement: PlacementConfig {
                key: key.into(),
                initial_positions: default_initial_positions(),
                repeat_interval: default_repeat_interval(),
            },
            request: RequestConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.placement.key.trim().is_empty() {
            return Err(ConfigError::Invalid("placement key is empty".into()));
        }
        if self.placement.initial_positions.is_empty() {
            return Err(ConfigError::Invalid(
                "placement needs at least one initial position".into(),
            ));
        }
        // Starts covering every residue of the interval turn each position
        // past them into a slot, and every ad shown would push content out.
        let spec = self.placement_spec();
        let interval = spec.repeat_interval();
        if interval > 0 && spec.initial_positions().len() >= interval {
            return Err(ConfigError::Invalid(format!(
                "initial positions {:?} with repeat interval {interval} leave no room for content",
                self.placement.initial_positions
            )));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid("cache capacity must be > 0".into()));
        }
        if self.request.timeout_ms == 0 {
            return Err(ConfigError::Invalid("request timeout must be > 0".into()));
        }
        self.endpoint()?;
        Ok(())
    }

    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.request.endpoint).map_err(|source| ConfigError::Endpoint {
            endpoint: self.request.endpoint.clone(),
            source,
        })
    }

    pub fn placement_key(&self) -> PlacementKey {
        PlacementKey::new(self.placement.key.clone())
    }

    pub fn placement_spec(&self) -> PlacementSpec {
        PlacementSpec::new(
            self.placement.initial_positions.iter().copied(),
            self.placement.repeat_interval,
        )
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            capacity: self.cache.capacity,
            expiration: Duration::from_secs(self.cache.expiration_seconds),
            retry_delays: self
                .retry
                .delays_ms
                .iter()
                .map(|&ms| Duration::from_millis(ms))
                .collect(),
        }
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            downgrade_image_scheme: self.request.downgrade_image_scheme,
            default_logo_url: self.request.default_logo_url.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.request.timeout_ms)
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            params: BTreeMap::new(),
            debug: false,
            timeout_ms: default_timeout_ms(),
            downgrade_image_scheme: default_downgrade_image_scheme(),
            default_logo_url: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            expiration_seconds: default_expiration_seconds(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delays_ms: default_retry_delays_ms(),
        }
    }
}

fn default_initial_positions() -> Vec<usize> {
    vec![3]
}
fn default_repeat_interval() -> usize {
    10
}
fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_downgrade_image_scheme() -> bool {
    true
}
fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}
fn default_expiration_seconds() -> u64 {
    DEFAULT_EXPIRATION.as_secs()
}
fn default_retry_delays_ms() -> Vec<u64> {
    DEFAULT_RETRY_DELAYS_MS.to_vec()
}
