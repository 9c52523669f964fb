//! Navigation configuration
//!
//! Loads timing and sizing parameters for the navigation core from YAML.
//! Every field has a default, so an empty document (or no file at all)
//! yields a working configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure for the navigation core
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    pub cache: CacheConfig,
    pub animation: AnimationConfig,
    pub transition: TransitionConfig,
    pub queue: QueueConfig,
    /// Remote metadata provider. Absent when panoramas come from fixtures.
    pub provider: Option<ProviderConfig>,
}

/// Panorama metadata cache behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries older than this are never returned as fresh
    pub ttl_ms: u64,
    /// Maximum simultaneous provider calls during batch preload
    pub preload_concurrency: usize,
    /// Upper bound for a single provider call (None = wait forever)
    pub fetch_timeout_ms: Option<u64>,
    /// Interval of the background eviction loop
    pub eviction_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 300_000,
            preload_concurrency: 3,
            fetch_timeout_ms: Some(10_000),
            eviction_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Time between animation frames
    pub frame_interval_ms: u64,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
        }
    }
}

impl AnimationConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Panorama transition timing and retry policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransitionConfig {
    pub rotation_duration_ms: u64,
    pub confirm_poll_interval_ms: u64,
    pub confirm_timeout_ms: u64,
    /// Total swap attempts, including the first one
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            rotation_duration_ms: 1500,
            confirm_poll_interval_ms: 100,
            confirm_timeout_ms: 5000,
            max_attempts: 3,
            retry_backoff_ms: 1000,
        }
    }
}

impl TransitionConfig {
    pub fn rotation_duration(&self) -> Duration {
        Duration::from_millis(self.rotation_duration_ms)
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_interval_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Operation queue pacing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Minimum gap between the end of one dispatch and the start of the next
    pub min_interval_ms: u64,
    /// Rotation duration for view-only operations
    pub rotation_duration_ms: u64,
    pub event_capacity: usize,
    pub timeline_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 2000,
            rotation_duration_ms: 1500,
            event_capacity: 64,
            timeline_capacity: 100,
        }
    }
}

impl QueueConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn rotation_duration(&self) -> Duration {
        Duration::from_millis(self.rotation_duration_ms)
    }
}

/// Street View metadata endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl NavigationConfig {
    /// Load and validate configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        // serde_yaml treats an empty document as null, not as an empty map
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.preload_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "cache.preload_concurrency must be at least 1".to_string(),
            ));
        }
        if self.transition.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "transition.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.transition.confirm_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "transition.confirm_poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.animation.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "animation.frame_interval_ms must be positive".to_string(),
            ));
        }
        if self.queue.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue.event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
