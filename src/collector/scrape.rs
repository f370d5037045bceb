//! Authenticated fetches against a single node's metrics endpoint.

use log::{debug, warn};
use native_tls::{Certificate, TlsConnector};
use reqwest::StatusCode;
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::config::CollectorConfig;
use crate::error::{RelabelError, Result};

/// Failure of a single node fetch
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScrapeError {
    #[error("execute request: {0}")]
    Request(String),

    #[error("unexpected status code {status}: {body}")]
    Status { status: u16, body: String },

    #[error("read response: {0}")]
    Body(String),
}

impl ScrapeError {
    /// Error text on a single line, for inline annotations
    pub fn summary(&self) -> String {
        flatten(&self.to_string())
    }
}

fn flatten(text: &str) -> String {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// HTTP client for node metrics endpoints
#[derive(Debug, Clone)]
pub struct NodeScraper {
    client: reqwest::Client,
    config: CollectorConfig,
}

impl NodeScraper {
    /// Build a scraper with the TLS and timeout settings of `config`
    pub fn new(config: CollectorConfig) -> Result<Self> {
        let connector = build_tls_connector(&config)?;
        let client = reqwest::Client::builder()
            .use_preconfigured_tls(connector)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Fetch the full payload of one node
    pub async fn scrape(&self, address: &str, token: &str) -> std::result::Result<String, ScrapeError> {
        let url = self.config.url_for(address);

        let mut response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ScrapeError::Request(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            let mut body = Vec::new();
            while body.len() < self.config.error_body_limit {
                match response.chunk().await {
                    Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                    _ => break,
                }
            }
            body.truncate(self.config.error_body_limit);

            return Err(ScrapeError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ScrapeError::Body(e.to_string()))?;

        debug!("Fetched cadvisor metrics from {} ({} bytes)", address, body.len());
        Ok(body)
    }
}

fn build_tls_connector(config: &CollectorConfig) -> Result<TlsConnector> {
    let mut builder = TlsConnector::builder();

    if config.insecure_skip_verify {
        builder.danger_accept_invalid_certs(true);
    } else if let Some(ca_cert_path) = &config.ca_cert_file {
        // An unusable CA bundle falls back to the system roots
        match load_certificate(ca_cert_path) {
            Ok(ca_cert) => {
                builder.add_root_certificate(ca_cert);
            }
            Err(e) => warn!("Unable to use CA certificate {}: {}", ca_cert_path.display(), e),
        }
    }

    Ok(builder.build()?)
}

/// Load a PEM certificate from a file
pub fn load_certificate<P: AsRef<Path>>(path: P) -> Result<Certificate> {
    let cert_data = fs::read(path.as_ref()).map_err(|e| {
        RelabelError::Tls(format!(
            "Failed to read certificate file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    Certificate::from_pem(&cert_data)
        .map_err(|e| RelabelError::Tls(format!("Invalid certificate format: {}", e)))
}
