use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;
use tokio::sync::RwLock;

/// A change in a tracked entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityChange<V> {
    /// Entry was added
    Added(V),
    /// Entry was updated
    Updated {
        /// The old value
        old: V,
        /// The new value
        new: V,
    },
    /// Entry was removed
    Removed(V),
}

/// Detects added, updated and removed entries between successive snapshots
pub struct ChangeTracker<K, V> {
    name: String,
    known: RwLock<HashMap<K, V>>,
}

impl<K, V> ChangeTracker<K, V>
where
    K: Eq + Hash + Ord + Clone + Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Debug + Send + Sync + 'static,
{
    /// Create a new change tracker
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            known: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the known entries with `snapshot` and return what changed,
    /// ordered by key
    pub async fn track(&self, snapshot: HashMap<K, V>) -> Vec<(K, EntityChange<V>)> {
        let mut current = self.known.write().await;
        let mut changes = BTreeMap::new();

        for (key, value) in &snapshot {
            match current.get(key) {
                Some(existing) if existing == value => {}
                Some(existing) => {
                    changes.insert(
                        key.clone(),
                        EntityChange::Updated {
                            old: existing.clone(),
                            new: value.clone(),
                        },
                    );
                }
                None => {
                    changes.insert(key.clone(), EntityChange::Added(value.clone()));
                }
            }
        }

        for (key, value) in current.iter() {
            if !snapshot.contains_key(key) {
                changes.insert(key.clone(), EntityChange::Removed(value.clone()));
            }
        }

        *current = snapshot;
        changes.into_iter().collect()
    }

    /// Get a specific entry by key
    pub async fn get(&self, key: &K) -> Option<V> {
        self.known.read().await.get(key).cloned()
    }

    /// Number of known entries
    pub async fn len(&self) -> usize {
        self.known.read().await.len()
    }

    /// Get the name of this tracker
    pub fn name(&self) -> &str {
        &self.name
    }
}
