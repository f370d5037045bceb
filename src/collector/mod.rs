mod cadvisor;
mod config;
mod core;
mod periodic;
mod scrape;

// Re-export public items
pub use cadvisor::{CadvisorCollector, annotate_failures, combine_payloads};
pub use config::{CollectorConfig, CollectorConfigBuilder, ERROR_BODY_LIMIT};
pub use core::Collector;
pub use periodic::PeriodicPublisher;
pub use scrape::{NodeScraper, ScrapeError, load_certificate};
