use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Top-level configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Rate limiter configuration
    #[serde(default)]
    pub rate: RateConfig,

    /// Conversation context configuration
    #[serde(default)]
    pub context: ContextConfig,

    /// Result cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Durable snapshot configuration
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Completion provider configuration
    pub provider: ProviderConfig,
}

/// Scheduler configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of pending requests before submissions are rejected
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Worker pool size for concurrent completion calls
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Rate limiter configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RateConfig {
    /// Target rate ceiling in requests per second
    #[serde(default = "default_target_rate")]
    pub target: f64,

    /// Hard minimum rate the limiter never drops below
    #[serde(default = "default_floor_rate")]
    pub floor: f64,
}

/// Conversation context configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Maximum messages retained per conversation window
    #[serde(default = "default_window_cap")]
    pub window_cap: usize,

    /// Maximum number of tracked conversations before LRU eviction
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,
}

/// Result cache configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Maximum cached result entries
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

/// Durable snapshot configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotConfig {
    /// Directory where the queue snapshot file is stored
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

/// Completion provider configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Base URL of the OpenAI-compatible completion API
    pub api_base: String,

    /// API key for the provider
    pub api_key: String,

    /// Model name to use
    pub model: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Number of reply options requested per message
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
}

// Default values for optional configuration
fn default_queue_capacity() -> usize {
    100
}

fn default_workers() -> usize {
    4
}

fn default_target_rate() -> f64 {
    2.0
}

fn default_floor_rate() -> f64 {
    0.5
}

fn default_window_cap() -> usize {
    50
}

fn default_max_conversations() -> usize {
    100
}

fn default_cache_capacity() -> usize {
    100
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_suggestions() -> usize {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
        }
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            target: default_target_rate(),
            floor: default_floor_rate(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window_cap: default_window_cap(),
            max_conversations: default_max_conversations(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config = toml::from_str(&config_text)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        Ok(config)
    }

    /// Create a new config with default values for testing
    pub fn for_testing() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            rate: RateConfig::default(),
            context: ContextConfig::default(),
            cache: CacheConfig::default(),
            snapshot: SnapshotConfig {
                data_dir: "./data".to_string(),
            },
            provider: ProviderConfig {
                api_base: "http://localhost:0".to_string(),
                api_key: "test-key".to_string(),
                model: "test-model".to_string(),
                timeout_seconds: default_timeout(),
                max_suggestions: default_max_suggestions(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied_for_missing_sections() {
        let toml_text = r#"
            [provider]
            api_base = "https://api.example.com/v1"
            api_key = "k"
            model = "m"
        "#;
        let config: Config = toml::from_str(toml_text).unwrap();

        assert_eq!(config.scheduler.queue_capacity, 100);
        assert_eq!(config.scheduler.workers, 4);
        assert_eq!(config.rate.floor, 0.5);
        assert_eq!(config.context.window_cap, 50);
        assert_eq!(config.context.max_conversations, 100);
        assert_eq!(config.cache.capacity, 100);
        assert_eq!(config.provider.max_suggestions, 3);
    }

    #[test]
    fn test_explicit_values_override_defaults() {
        let toml_text = r#"
            [scheduler]
            queue_capacity = 10
            workers = 2

            [rate]
            target = 5.0
            floor = 1.0

            [provider]
            api_base = "https://api.example.com/v1"
            api_key = "k"
            model = "m"
            timeout_seconds = 5
        "#;
        let config: Config = toml::from_str(toml_text).unwrap();

        assert_eq!(config.scheduler.queue_capacity, 10);
        assert_eq!(config.rate.target, 5.0);
        assert_eq!(config.provider.timeout_seconds, 5);
    }
}
