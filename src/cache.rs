//! In-memory view of node addresses and pod labels.
//!
//! The cache is written by metadata events and read by collection cycles.
//! Entries are independent: every operation is atomic per key and writers to
//! different keys never contend on a shared lock.

use dashmap::DashMap;
use log::trace;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Label name to label value mapping of a workload
pub type LabelSet = HashMap<String, String>;

/// Identity of a workload, rendered as `namespace/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkloadKey {
    pub namespace: String,
    pub name: String,
}

impl WorkloadKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Thread-safe store of node addresses and workload label sets
#[derive(Debug, Default)]
pub struct MetadataCache {
    node_addresses: DashMap<String, String>,
    workload_labels: DashMap<WorkloadKey, LabelSet>,
}

impl MetadataCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node address; an empty address removes the node
    pub fn store_node_address(&self, node: &str, address: &str) {
        if address.is_empty() {
            self.node_addresses.remove(node);
            trace!("Removed node '{}' due to empty address", node);
            return;
        }

        self.node_addresses
            .insert(node.to_string(), address.to_string());
        trace!("Cached address {} for node '{}'", address, node);
    }

    /// Remove a node entry
    pub fn delete_node(&self, node: &str) {
        self.node_addresses.remove(node);
        trace!("Deleted node '{}' from cache", node);
    }

    /// Store a private copy of the labels; an empty set removes the entry
    pub fn store_workload_labels(&self, namespace: &str, name: &str, labels: &LabelSet) {
        let key = WorkloadKey::new(namespace, name);
        if labels.is_empty() || labels.values().all(|v| v.is_empty()) {
            trace!("Removed labels for {} due to empty label set", key);
            self.workload_labels.remove(&key);
            return;
        }

        trace!("Cached {} labels for {}", labels.len(), key);
        self.workload_labels.insert(key, labels.clone());
    }

    /// Remove cached labels for a workload
    pub fn delete_workload_labels(&self, namespace: &str, name: &str) {
        let key = WorkloadKey::new(namespace, name);
        self.workload_labels.remove(&key);
        trace!("Deleted labels for {} from cache", key);
    }

    /// Known node addresses, sorted and deduplicated
    pub fn addresses(&self) -> Vec<String> {
        let addresses: BTreeSet<String> = self
            .node_addresses
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|address| !address.is_empty())
            .collect();
        addresses.into_iter().collect()
    }

    /// A copy of the cached labels for a workload
    pub fn labels(&self, namespace: &str, name: &str) -> Option<LabelSet> {
        let key = WorkloadKey::new(namespace, name);
        match self.workload_labels.get(&key) {
            Some(labels) => {
                trace!("Label cache hit for {}", key);
                Some(labels.value().clone())
            }
            None => {
                trace!("Label cache miss for {}", key);
                None
            }
        }
    }

    /// Sorted unique, non-blank, trimmed values observed for a label key
    pub fn unique_values(&self, label: &str) -> Vec<String> {
        let label = label.trim();
        if label.is_empty() {
            return Vec::new();
        }

        let values: BTreeSet<String> = self
            .workload_labels
            .iter()
            .filter_map(|entry| entry.value().get(label).map(|v| v.trim().to_string()))
            .filter(|v| !v.is_empty())
            .collect();
        values.into_iter().collect()
    }

    /// Number of cached nodes
    pub fn node_count(&self) -> usize {
        self.node_addresses.len()
    }

    /// Number of cached workloads
    pub fn workload_count(&self) -> usize {
        self.workload_labels.len()
    }
}
