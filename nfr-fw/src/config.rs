use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Maximum number of forwarding threads.
pub const MAX_FW_THREADS: usize = 32;

/// Errors raised while loading or validating the forwarder configuration.
/// All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid forwarding thread count {0} (must be 1-{MAX_FW_THREADS})")]
    InvalidThreadCount(usize),
    #[error("Unknown CS replacement policy: {0}")]
    UnknownReplacementPolicy(String),
    #[error("Unknown FIB table algorithm: {0}")]
    UnknownFibAlgorithm(String),
    #[error("FIB hashtable depth m must be at least 1")]
    InvalidFibHashtableDepth,
    #[error("Invalid network region prefix: {0}")]
    InvalidRegion(String),
}

/// Top-level forwarder configuration, loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub forwarder: ForwarderConfig,
    pub tables: TablesConfig,
    pub faces: FacesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Number of forwarding threads to shard packet processing over.
    pub threads: usize,
    /// Per-thread ingress queue capacity, in packets.
    pub queue_size: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self { threads: 8, queue_size: 1024 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TablesConfig {
    pub content_store: ContentStoreConfig,
    pub dead_nonce_list: DeadNonceListConfig,
    pub fib: FibConfig,
    pub network_region: NetworkRegionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentStoreConfig {
    /// Maximum number of cached Data packets per forwarding thread.
    pub capacity: usize,
    /// Whether to admit new Data packets into the content store.
    pub admit: bool,
    /// Whether to serve cached Data packets.
    pub serve: bool,
    pub replacement_policy: String,
}

impl Default for ContentStoreConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            admit: true,
            serve: true,
            replacement_policy: "lru".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadNonceListConfig {
    /// How long a (name, nonce) pair stays on the dead nonce list.
    pub lifetime_ms: u64,
}

impl Default for DeadNonceListConfig {
    fn default() -> Self {
        Self { lifetime_ms: 6000 }
    }
}

impl DeadNonceListConfig {
    pub fn lifetime(&self) -> Duration {
        Duration::from_millis(self.lifetime_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FibConfig {
    /// FIB backend: "nametree" or "hashtable".
    pub algorithm: String,
    pub hashtable: FibHashtableConfig,
}

impl Default for FibConfig {
    fn default() -> Self {
        Self {
            algorithm: "nametree".to_string(),
            hashtable: FibHashtableConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FibHashtableConfig {
    /// Depth of the virtual-node layer in the hashtable backend.
    pub m: usize,
}

impl Default for FibHashtableConfig {
    fn default() -> Self {
        Self { m: 5 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkRegionConfig {
    /// Producer region prefixes this forwarder belongs to, in URI form.
    pub regions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FacesConfig {
    /// Per-face outgoing queue capacity, in packets.
    pub queue_size: usize,
    pub congestion_marking: bool,
    pub congestion_threshold_bytes: u64,
    pub congestion_interval_ms: u64,
}

impl Default for FacesConfig {
    fn default() -> Self {
        Self {
            queue_size: 1024,
            congestion_marking: true,
            congestion_threshold_bytes: 65536,
            congestion_interval_ms: 100,
        }
    }
}

impl FacesConfig {
    pub fn congestion_interval(&self) -> Duration {
        Duration::from_millis(self.congestion_interval_ms)
    }
}

impl Config {
    /// Load a configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate constraints that serde cannot express. Called before the
    /// forwarder starts; a failure here aborts startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.forwarder.threads == 0 || self.forwarder.threads > MAX_FW_THREADS {
            return Err(ConfigError::InvalidThreadCount(self.forwarder.threads));
        }
        if self.tables.content_store.replacement_policy != "lru" {
            return Err(ConfigError::UnknownReplacementPolicy(
                self.tables.content_store.replacement_policy.clone(),
            ));
        }
        match self.tables.fib.algorithm.as_str() {
            "nametree" => {}
            "hashtable" => {
                if self.tables.fib.hashtable.m == 0 {
                    return Err(ConfigError::InvalidFibHashtableDepth);
                }
            }
            other => return Err(ConfigError::UnknownFibAlgorithm(other.to_string())),
        }
        for region in &self.tables.network_region.regions {
            if nfr_core::Name::from_str(region).is_err() {
                return Err(ConfigError::InvalidRegion(region.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_parse_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [forwarder]
            threads = 4

            [tables.fib]
            algorithm = "hashtable"

            [tables.network_region]
            regions = ["/example/region"]
            "#,
        )
        .unwrap();
        assert_eq!(config.forwarder.threads, 4);
        assert_eq!(config.tables.fib.algorithm, "hashtable");
        assert_eq!(config.tables.fib.hashtable.m, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_thread_count_bounds() {
        let mut config = Config::default();
        config.forwarder.threads = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreadCount(0))
        ));
        config.forwarder.threads = 33;
        assert!(config.validate().is_err());
        config.forwarder.threads = 32;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let mut config = Config::default();
        config.tables.content_store.replacement_policy = "fifo".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownReplacementPolicy(_))
        ));
    }

    #[test]
    fn test_unknown_fib_algorithm_rejected() {
        let mut config = Config::default();
        config.tables.fib.algorithm = "trie".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownFibAlgorithm(_))
        ));
    }

    #[test]
    fn test_invalid_region_rejected() {
        let mut config = Config::default();
        config.tables.network_region.regions = vec!["/bad/%Z".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRegion(_))));
    }
}
