use std::path::PathBuf;
use std::time::Duration;

use crate::config::{ADDRESS_PLACEHOLDER, RelabelConfig};
use crate::relation::RELATION_MODULUS;

/// Upper bound on the error body read from a non-200 response
pub const ERROR_BODY_LIMIT: usize = 512;

/// Configuration for a cadvisor collector
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Name of the collector
    pub name: String,
    /// File holding the bearer token
    pub token_file: PathBuf,
    /// CA bundle used to verify node certificates
    pub ca_cert_file: Option<PathBuf>,
    /// Accept invalid node certificates
    pub insecure_skip_verify: bool,
    /// Timeout for a single node request
    pub request_timeout: Duration,
    /// Maximum number of in-flight node requests
    pub max_concurrent_scrapes: usize,
    /// URL template, `{address}` is replaced by the node address
    pub endpoint: String,
    /// Bytes of body kept as context for a failed request
    pub error_body_limit: usize,
    /// Modulus for relation digests
    pub relation_modulus: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            name: "cadvisor".to_string(),
            token_file: PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/token"),
            ca_cert_file: None,
            insecure_skip_verify: false,
            request_timeout: Duration::from_secs(8),
            max_concurrent_scrapes: 10,
            endpoint: "https://{address}:10250/metrics/cadvisor".to_string(),
            error_body_limit: ERROR_BODY_LIMIT,
            relation_modulus: RELATION_MODULUS,
        }
    }
}

impl CollectorConfig {
    /// Scrape URL for a node address
    pub fn url_for(&self, address: &str) -> String {
        self.endpoint.replace(ADDRESS_PLACEHOLDER, address)
    }
}

impl From<&RelabelConfig> for CollectorConfig {
    fn from(config: &RelabelConfig) -> Self {
        Self {
            token_file: config.token_file.clone(),
            ca_cert_file: config.ca_cert_file.clone(),
            insecure_skip_verify: config.insecure_skip_verify,
            request_timeout: config.request_timeout(),
            max_concurrent_scrapes: config.max_concurrent_scrapes,
            endpoint: config.scrape_endpoint.clone(),
            relation_modulus: config.relation_modulus,
            ..Default::default()
        }
    }
}

/// Builder for collector configuration
pub struct CollectorConfigBuilder {
    config: CollectorConfig,
}

impl CollectorConfigBuilder {
    /// Create a new collector config builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: CollectorConfig {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    /// Set the token file
    pub fn token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.token_file = path.into();
        self
    }

    /// Set the CA bundle
    pub fn ca_cert_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ca_cert_file = Some(path.into());
        self
    }

    pub fn insecure_skip_verify(mut self, skip: bool) -> Self {
        self.config.insecure_skip_verify = skip;
        self
    }

    /// Set the per-request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the concurrency ceiling
    pub fn max_concurrent_scrapes(mut self, max: usize) -> Self {
        self.config.max_concurrent_scrapes = max;
        self
    }

    /// Set the URL template
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    pub fn relation_modulus(mut self, modulus: u64) -> Self {
        self.config.relation_modulus = modulus;
        self
    }

    /// Build the configuration
    pub fn build(self) -> CollectorConfig {
        self.config
    }
}
