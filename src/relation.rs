//! Synthetic metric exposing a digest per known label value.
//!
//! Each `(label_key, label_value)` pair is emitted once with a numeric value
//! derived from the label value. The digest is a fingerprint only and is not
//! collision resistant.

use md5::{Digest, Md5};
use std::collections::{BTreeSet, HashSet};
use std::fmt::Write;

use crate::labels::{EnrichmentSpec, escape_label_value};

/// Name of the synthetic relation metric
pub const RELATION_METRIC_NAME: &str = "kubelet_cadvisor_label_relation";

/// Modulus applied to relation digests (2^32 - 1)
pub const RELATION_MODULUS: u64 = 4_294_967_295;

/// Digest of a label value: bytes 8..16 of its MD5 sum read as a big-endian
/// u64, reduced modulo `modulus`.
pub fn relation_digest(value: &str, modulus: u64) -> u64 {
    let sum = Md5::digest(value.as_bytes());
    let mut window = [0u8; 8];
    window.copy_from_slice(&sum[8..16]);
    u64::from_be_bytes(window) % modulus
}

/// Builds the relation metric from the currently known label values
#[derive(Debug, Clone)]
pub struct RelationBuilder {
    metric_name: String,
    modulus: u64,
}

impl Default for RelationBuilder {
    fn default() -> Self {
        Self::new(RELATION_MODULUS)
    }
}

impl RelationBuilder {
    /// Create a builder with the given digest modulus
    pub fn new(modulus: u64) -> Self {
        Self {
            metric_name: RELATION_METRIC_NAME.to_string(),
            modulus: modulus.max(1),
        }
    }

    /// Override the metric name
    pub fn with_metric_name(mut self, name: impl Into<String>) -> Self {
        self.metric_name = name.into();
        self
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    /// Digest of a single value with this builder's modulus
    pub fn digest(&self, value: &str) -> u64 {
        relation_digest(value, self.modulus)
    }

    /// Render the relation metric.
    ///
    /// `unique_values` returns the values currently known for a label key.
    /// The label's default (per-label, then global) is added to that set.
    /// Returns an empty string when no key has any value.
    pub fn build<F>(&self, spec: &EnrichmentSpec, unique_values: F) -> String
    where
        F: Fn(&str) -> Vec<String>,
    {
        let mut output = String::new();
        let mut preamble_written = false;
        let mut seen = HashSet::new();

        for key in spec.labels() {
            let key = key.trim();
            if key.is_empty() || !seen.insert(key) {
                continue;
            }

            let mut values: BTreeSet<String> = unique_values(key)
                .into_iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            if let Some(default) = spec.defaults().resolve(key) {
                values.insert(default.to_string());
            }

            if values.is_empty() {
                continue;
            }

            if !preamble_written {
                let _ = writeln!(
                    output,
                    "# HELP {} Hash of unique pod label values requested via ADD_LABELS.",
                    self.metric_name
                );
                let _ = writeln!(output, "# TYPE {} gauge", self.metric_name);
                preamble_written = true;
            }

            for value in &values {
                let _ = writeln!(
                    output,
                    "{}{{label_key=\"{}\",label_value=\"{}\"}} {}",
                    self.metric_name,
                    escape_label_value(key),
                    escape_label_value(value),
                    self.digest(value)
                );
            }
        }

        output
    }
}
