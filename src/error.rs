// src/error.rs
use std::io;
use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, RelabelError>;

/// Custom Error type for the relabelling agent
#[derive(Error, Debug)]
pub enum RelabelError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("No scrape targets: {0}")]
    NoTargets(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("cadvisor scrape failed for all {attempted} nodes")]
    AllScrapesFailed { attempted: usize },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Inventory error: {0}")]
    Inventory(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Collection cancelled")]
    Cancelled,
}

impl RelabelError {
    /// Whether the error only affects the current collection cycle
    pub fn is_per_cycle(&self) -> bool {
        matches!(
            self,
            RelabelError::NoTargets(_)
                | RelabelError::Credential(_)
                | RelabelError::AllScrapesFailed { .. }
                | RelabelError::Cancelled
        )
    }
}

impl From<reqwest::Error> for RelabelError {
    fn from(err: reqwest::Error) -> Self {
        RelabelError::Http(err.to_string())
    }
}

impl From<native_tls::Error> for RelabelError {
    fn from(err: native_tls::Error) -> Self {
        RelabelError::Tls(err.to_string())
    }
}

impl From<toml::de::Error> for RelabelError {
    fn from(err: toml::de::Error) -> Self {
        RelabelError::Inventory(err.to_string())
    }
}
