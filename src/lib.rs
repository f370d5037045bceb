//! Aggregates per-node cAdvisor metrics and enriches samples with pod labels

pub mod agent;
pub mod cache;
pub mod change;
pub mod collector;
pub mod config;
pub mod error;
pub mod inventory;
pub mod labels;
pub mod processor;
pub mod relation;
pub mod server;
pub mod service;
pub mod source;
pub mod util;

pub use util::logging::init as init_logging;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::agent::Agent;
    pub use crate::cache::{LabelSet, MetadataCache, WorkloadKey};
    pub use crate::collector::{CadvisorCollector, Collector, CollectorConfig, PeriodicPublisher};
    pub use crate::config::{LogLevel, RelabelConfig};
    pub use crate::error::{RelabelError, Result};
    pub use crate::labels::{EnrichmentSpec, LabelDefaults};
    pub use crate::processor::LabelProcessor;
    pub use crate::relation::RelationBuilder;
    pub use crate::server::MetricsServer;
    pub use crate::service::{LabelLookup, MetadataEvent, MetadataService};
    pub use crate::source::MetadataSource;
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
