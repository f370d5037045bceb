//! Polling metadata source backed by a TOML inventory file.
//!
//! ```toml
//! [[nodes]]
//! name = "node-a"
//! address = "10.0.0.1"
//!
//! [[pods]]
//! namespace = "default"
//! name = "web-0"
//! labels = { app = "web", "app.kubernetes.io/name" = "web" }
//! ```
//!
//! Every poll diffs the file against the previous snapshot and emits the
//! resulting [`MetadataEvent`]s. A file that cannot be read or parsed leaves
//! the previous snapshot in place.

use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::{LabelSet, WorkloadKey};
use crate::change::{ChangeTracker, EntityChange};
use crate::error::{RelabelError, Result};
use crate::service::{LabelLookup, MetadataEvent};
use crate::source::MetadataSource;

/// Parsed inventory file
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Inventory {
    #[serde(default)]
    pub nodes: Vec<NodeEntry>,
    #[serde(default)]
    pub pods: Vec<PodEntry>,
}

/// A node and its internal address
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NodeEntry {
    pub name: String,
    #[serde(default)]
    pub address: String,
}

/// A pod and its labels
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PodEntry {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: LabelSet,
}

impl Inventory {
    /// Parse an inventory from TOML text
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse an inventory file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            RelabelError::Inventory(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    fn node_addresses(&self) -> HashMap<String, String> {
        self.nodes
            .iter()
            .map(|node| (node.name.clone(), node.address.trim().to_string()))
            .collect()
    }

    fn pod_labels(&self) -> HashMap<WorkloadKey, LabelSet> {
        self.pods
            .iter()
            .map(|pod| (WorkloadKey::new(&pod.namespace, &pod.name), pod.labels.clone()))
            .collect()
    }
}

struct InventoryState {
    path: PathBuf,
    nodes: ChangeTracker<String, String>,
    pods: ChangeTracker<WorkloadKey, LabelSet>,
    snapshot: RwLock<HashMap<WorkloadKey, LabelSet>>,
}

impl InventoryState {
    async fn poll(&self) -> Result<Vec<MetadataEvent>> {
        let inventory = Inventory::load(&self.path)?;
        let pods = inventory.pod_labels();
        let mut events = Vec::new();

        for (name, change) in self.nodes.track(inventory.node_addresses()).await {
            events.push(match change {
                EntityChange::Added(address) | EntityChange::Updated { new: address, .. } => {
                    MetadataEvent::NodeAddressChanged { name, address }
                }
                EntityChange::Removed(_) => MetadataEvent::NodeRemoved { name },
            });
        }

        for (key, change) in self.pods.track(pods.clone()).await {
            events.push(match change {
                EntityChange::Added(labels) | EntityChange::Updated { new: labels, .. } => {
                    MetadataEvent::WorkloadLabelsChanged {
                        namespace: key.namespace,
                        name: key.name,
                        labels,
                    }
                }
                EntityChange::Removed(_) => MetadataEvent::WorkloadRemoved {
                    namespace: key.namespace,
                    name: key.name,
                },
            });
        }

        if let Ok(mut snapshot) = self.snapshot.write() {
            *snapshot = pods;
        }

        Ok(events)
    }
}

/// Metadata source that periodically re-reads an inventory file
pub struct InventorySource {
    name: String,
    interval: Duration,
    buffer_size: usize,
    state: Arc<InventoryState>,
    cancel: CancellationToken,
}

impl InventorySource {
    /// Create a source polling `path` every `interval`
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            name: "inventory".to_string(),
            interval,
            buffer_size: 256,
            state: Arc::new(InventoryState {
                path: path.into(),
                nodes: ChangeTracker::new("inventory-nodes"),
                pods: ChangeTracker::new("inventory-pods"),
                snapshot: RwLock::new(HashMap::new()),
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Set the event channel capacity
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Re-read the inventory once and return the resulting events
    pub async fn poll(&self) -> Result<Vec<MetadataEvent>> {
        self.state.poll().await
    }
}

#[async_trait::async_trait]
impl MetadataSource for InventorySource {
    async fn start(&self) -> Result<mpsc::Receiver<MetadataEvent>> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let interval = self.interval;

        info!(
            "Starting inventory source for {} (interval: {:?})",
            state.path.display(),
            interval
        );

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }

                match state.poll().await {
                    Ok(events) => {
                        if !events.is_empty() {
                            debug!(
                                "Inventory poll produced {} events ({} nodes, {} pods known)",
                                events.len(),
                                state.nodes.len().await,
                                state.pods.len().await
                            );
                        }
                        for event in events {
                            if tx.send(event).await.is_err() {
                                // Receiver dropped, nothing left to feed
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Inventory poll failed, keeping previous snapshot: {}", e);
                    }
                }
            }

            info!("Inventory source stopped");
        });

        Ok(rx)
    }

    async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl LabelLookup for InventorySource {
    fn lookup(&self, namespace: &str, name: &str) -> Option<LabelSet> {
        let snapshot = self.state.snapshot.read().ok()?;
        snapshot.get(&WorkloadKey::new(namespace, name)).cloned()
    }
}
