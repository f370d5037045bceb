//! Cluster metadata access for the collector.
//!
//! `MetadataService` applies subscription events to the [`MetadataCache`] and
//! answers label lookups cache-first, falling back to an authoritative
//! [`LabelLookup`] on a miss.

use log::{debug, info, trace};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::{LabelSet, MetadataCache};

/// A change notification for node or workload metadata
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataEvent {
    /// Node added or its address changed; an empty address removes it
    NodeAddressChanged { name: String, address: String },
    /// Node deleted
    NodeRemoved { name: String },
    /// Workload added or its labels changed; an empty set removes it
    WorkloadLabelsChanged {
        namespace: String,
        name: String,
        labels: LabelSet,
    },
    /// Workload deleted
    WorkloadRemoved { namespace: String, name: String },
}

/// Synchronous authoritative lookup used on cache misses
pub trait LabelLookup: Send + Sync + 'static {
    /// Labels of a workload, or `None` if it is unknown
    fn lookup(&self, namespace: &str, name: &str) -> Option<LabelSet>;
}

/// Owner of the metadata cache and its fallback
pub struct MetadataService {
    cache: MetadataCache,
    fallback: Option<Arc<dyn LabelLookup>>,
}

impl Default for MetadataService {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataService {
    /// Service with an empty cache and no fallback
    pub fn new() -> Self {
        Self {
            cache: MetadataCache::new(),
            fallback: None,
        }
    }

    /// Attach an authoritative lookup for cache misses
    pub fn with_fallback(mut self, fallback: Arc<dyn LabelLookup>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn on_node_address_changed(&self, name: &str, address: &str) {
        debug!("Node '{}' added/updated with address '{}'", name, address);
        self.cache.store_node_address(name, address);
    }

    pub fn on_node_removed(&self, name: &str) {
        debug!("Node '{}' deleted", name);
        self.cache.delete_node(name);
    }

    pub fn on_workload_labels_changed(&self, namespace: &str, name: &str, labels: &LabelSet) {
        trace!("Pod {}/{} added/updated", namespace, name);
        self.cache.store_workload_labels(namespace, name, labels);
    }

    pub fn on_workload_removed(&self, namespace: &str, name: &str) {
        trace!("Pod {}/{} deleted", namespace, name);
        self.cache.delete_workload_labels(namespace, name);
    }

    /// Apply a single event to the cache
    pub fn apply(&self, event: &MetadataEvent) {
        match event {
            MetadataEvent::NodeAddressChanged { name, address } => {
                self.on_node_address_changed(name, address)
            }
            MetadataEvent::NodeRemoved { name } => self.on_node_removed(name),
            MetadataEvent::WorkloadLabelsChanged {
                namespace,
                name,
                labels,
            } => self.on_workload_labels_changed(namespace, name, labels),
            MetadataEvent::WorkloadRemoved { namespace, name } => {
                self.on_workload_removed(namespace, name)
            }
        }
    }

    /// Drain events into the cache until the channel closes or `cancel` fires
    pub async fn run(&self, mut events: mpsc::Receiver<MetadataEvent>, cancel: CancellationToken) {
        info!("Metadata event pump started");
        let mut applied: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        self.apply(&event);
                        applied += 1;
                    }
                    None => break,
                },
            }
        }

        info!("Metadata event pump stopped after {} events", applied);
    }

    /// Known node addresses, sorted
    pub fn addresses(&self) -> Vec<String> {
        self.cache.addresses()
    }

    /// Sorted unique values for a label key
    pub fn unique_values(&self, label: &str) -> Vec<String> {
        self.cache.unique_values(label)
    }

    /// Labels of a workload: cache first, then the fallback (whose answer is
    /// written back to the cache)
    pub fn workload_labels(&self, namespace: &str, name: &str) -> Option<LabelSet> {
        if let Some(labels) = self.cache.labels(namespace, name) {
            return Some(labels);
        }

        let fallback = self.fallback.as_ref()?;
        match fallback.lookup(namespace, name) {
            Some(labels) => {
                self.cache.store_workload_labels(namespace, name, &labels);
                Some(labels)
            }
            None => {
                debug!("Pod labels unavailable from fallback for {}/{}", namespace, name);
                None
            }
        }
    }

    /// Short summary of cache contents for logging
    pub fn debug_string(&self) -> String {
        format!(
            "nodes={} workloads={}",
            self.cache.node_count(),
            self.cache.workload_count()
        )
    }
}
