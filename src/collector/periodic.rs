use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::core::Collector;
use crate::error::{RelabelError, Result};
use crate::server::MetricsServer;

/// Runs a collector on a fixed interval and publishes each successful result
pub struct PeriodicPublisher {
    collector: Arc<dyn Collector>,
    server: MetricsServer,
    interval: Duration,
    add_labels: String,
    label_defaults: String,
}

impl PeriodicPublisher {
    /// Create a publisher feeding `server`
    pub fn new(collector: Arc<dyn Collector>, server: MetricsServer, interval: Duration) -> Self {
        Self {
            collector,
            server,
            interval,
            add_labels: String::new(),
            label_defaults: String::new(),
        }
    }

    /// Set the raw label settings passed to every cycle
    pub fn with_labels(mut self, add_labels: impl Into<String>, label_defaults: impl Into<String>) -> Self {
        self.add_labels = add_labels.into();
        self.label_defaults = label_defaults.into();
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one cycle bounded by the interval.
    ///
    /// Returns whether a payload was published. A failed or empty cycle
    /// leaves the previously published payload in place.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<bool> {
        let cycle = self
            .collector
            .collect(cancel, &self.add_labels, &self.label_defaults);

        let payload = match time::timeout(self.interval, cycle).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Collection by {} exceeded its {:?} deadline",
                    self.collector.name(),
                    self.interval
                );
                return Err(RelabelError::Cancelled);
            }
        };

        if payload.is_empty() {
            warn!("Collector {} produced an empty payload", self.collector.name());
            return Ok(false);
        }

        self.server.update(payload).await;
        Ok(true)
    }

    /// Collect immediately, then once per interval until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Starting periodic collection with {} (interval: {:?})",
            self.collector.name(),
            self.interval
        );

        let mut timer = time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            if let Err(e) = self.run_once(&cancel).await {
                if cancel.is_cancelled() {
                    break;
                }
                error!("Failed to collect metrics: {}", e);
            }
        }

        info!("Periodic collection stopped");
    }
}
