use log::{debug, warn};
use serde::Deserialize;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RelabelError, Result};

/// Placeholder substituted with a node address in the scrape endpoint
pub const ADDRESS_PLACEHOLDER: &str = "{address}";

/// Source of configuration
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// File path (TOML format)
    File(PathBuf),
    /// Environment variables with a prefix
    Environment(String),
    /// TOML string
    Toml(String),
    /// Default configuration
    Defaults,
}

/// Logging level
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    #[default]
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

impl LogLevel {
    /// Parse a level name, falling back to `Info` for anything unrecognised
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(LogLevel::parse(&value))
    }
}

/// Runtime configuration for the relabelling agent
#[derive(Debug, Deserialize, Clone)]
pub struct RelabelConfig {
    /// Port the metrics endpoint listens on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Logging level
    #[serde(default)]
    pub log_level: LogLevel,
    /// Comma-separated pod label names to inject
    #[serde(default)]
    pub add_labels: String,
    /// Comma-separated defaults, bare values or `key=value`
    #[serde(default = "default_label_defaults")]
    pub label_defaults: String,
    /// Bearer token used against the kubelets
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    /// CA bundle for verifying kubelet certificates
    #[serde(default = "default_ca_cert_file")]
    pub ca_cert_file: Option<PathBuf>,
    /// Skip kubelet certificate verification
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Collection interval in seconds
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval: u64,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// Maximum in-flight node scrapes
    #[serde(default = "default_max_concurrent_scrapes")]
    pub max_concurrent_scrapes: usize,
    /// Scrape URL template, `{address}` is replaced by the node address
    #[serde(default = "default_scrape_endpoint")]
    pub scrape_endpoint: String,
    /// Modulus applied to label relation digests
    #[serde(default = "default_relation_modulus")]
    pub relation_modulus: u64,
    /// Inventory file describing nodes and pods
    #[serde(default)]
    pub inventory_file: Option<PathBuf>,
    /// Inventory poll interval in seconds
    #[serde(default = "default_inventory_interval")]
    pub inventory_interval: u64,
}

fn default_port() -> u16 {
    9090
}

fn default_label_defaults() -> String {
    "unknown".to_string()
}

fn default_token_file() -> PathBuf {
    PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/token")
}

fn default_ca_cert_file() -> Option<PathBuf> {
    Some(PathBuf::from(
        "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt",
    ))
}

fn default_fetch_interval() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    8
}

fn default_max_concurrent_scrapes() -> usize {
    10
}

fn default_scrape_endpoint() -> String {
    "https://{address}:10250/metrics/cadvisor".to_string()
}

fn default_relation_modulus() -> u64 {
    crate::relation::RELATION_MODULUS
}

fn default_inventory_interval() -> u64 {
    15
}

impl Default for RelabelConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: LogLevel::default(),
            add_labels: String::new(),
            label_defaults: default_label_defaults(),
            token_file: default_token_file(),
            ca_cert_file: default_ca_cert_file(),
            insecure_skip_verify: false,
            fetch_interval: default_fetch_interval(),
            request_timeout: default_request_timeout(),
            max_concurrent_scrapes: default_max_concurrent_scrapes(),
            scrape_endpoint: default_scrape_endpoint(),
            relation_modulus: default_relation_modulus(),
            inventory_file: None,
            inventory_interval: default_inventory_interval(),
        }
    }
}

impl RelabelConfig {
    /// Ensure the configuration values fall within acceptable ranges
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(RelabelError::Config(
                "port must be within range 1-65535".to_string(),
            ));
        }
        if self.fetch_interval == 0 {
            return Err(RelabelError::Config(
                "fetch interval must be greater than zero seconds".to_string(),
            ));
        }
        if self.request_timeout == 0 {
            return Err(RelabelError::Config(
                "request timeout must be greater than zero seconds".to_string(),
            ));
        }
        if self.max_concurrent_scrapes == 0 {
            return Err(RelabelError::Config(
                "max concurrent scrapes must be at least 1".to_string(),
            ));
        }
        if self.relation_modulus == 0 {
            return Err(RelabelError::Config(
                "relation modulus must be non-zero".to_string(),
            ));
        }
        if !self.scrape_endpoint.contains(ADDRESS_PLACEHOLDER) {
            return Err(RelabelError::Config(format!(
                "scrape endpoint must contain {}",
                ADDRESS_PLACEHOLDER
            )));
        }
        if self.inventory_interval == 0 {
            return Err(RelabelError::Config(
                "inventory interval must be greater than zero seconds".to_string(),
            ));
        }
        Ok(())
    }

    /// Collection interval
    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval)
    }

    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Inventory poll interval
    pub fn inventory_interval(&self) -> Duration {
        Duration::from_secs(self.inventory_interval)
    }
}

/// Helper function to load configuration from various sources
pub fn load_config<T>(sources: Vec<ConfigSource>) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    let mut builder = config::Config::builder();

    // Later sources override earlier ones
    for source in sources {
        match source {
            ConfigSource::File(path) => {
                if !path.exists() {
                    warn!("Configuration file not found: {}", path.display());
                    continue;
                }

                debug!("Loading TOML configuration from file: {}", path.display());
                builder = builder.add_source(
                    config::File::from(path.as_path()).format(config::FileFormat::Toml),
                );
            }
            ConfigSource::Environment(prefix) => {
                debug!("Loading configuration from environment with prefix: {}", prefix);
                builder = builder.add_source(
                    config::Environment::with_prefix(&prefix)
                        .prefix_separator("_")
                        .separator("__")
                        .try_parsing(true),
                );
            }
            ConfigSource::Toml(toml_str) => {
                debug!("Loading configuration from TOML string");
                builder = builder
                    .add_source(config::File::from_str(&toml_str, config::FileFormat::Toml));
            }
            ConfigSource::Defaults => {
                debug!("Using default configuration values");
            }
        }
    }

    let config = builder
        .build()
        .map_err(|e| RelabelError::Config(format!("Failed to build configuration: {}", e)))?;

    let result = config
        .try_deserialize()
        .map_err(|e| RelabelError::Config(format!("Failed to deserialize configuration: {}", e)))?;

    debug!("Configuration loaded successfully: {:?}", result);

    Ok(result)
}

/// Configuration builder
pub struct ConfigBuilder<T: for<'de> Deserialize<'de>> {
    sources: Vec<ConfigSource>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: for<'de> Deserialize<'de> + Debug> ConfigBuilder<T> {
    /// Create a new config builder
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Add a TOML file source
    pub fn add_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.sources
            .push(ConfigSource::File(path.as_ref().to_path_buf()));
        self
    }

    /// Add environment variables
    pub fn add_env(mut self, prefix: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Environment(prefix.into()));
        self
    }

    /// Add TOML string
    pub fn add_toml(mut self, toml: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Toml(toml.into()));
        self
    }

    /// Use default values
    pub fn use_defaults(mut self) -> Self {
        self.sources.push(ConfigSource::Defaults);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<T> {
        load_config::<T>(self.sources)
    }
}

impl<T: for<'de> Deserialize<'de> + Debug> Default for ConfigBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}
