//! Wires the metadata source, collector, publisher and HTTP server together.

use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::collector::{CadvisorCollector, CollectorConfig, PeriodicPublisher};
use crate::config::RelabelConfig;
use crate::error::Result;
use crate::inventory::InventorySource;
use crate::server::MetricsServer;
use crate::service::MetadataService;
use crate::source::MetadataSource;

/// A fully assembled relabelling agent
pub struct Agent {
    config: RelabelConfig,
    service: Arc<MetadataService>,
    inventory: Option<Arc<InventorySource>>,
    server: MetricsServer,
    publisher: PeriodicPublisher,
}

impl Agent {
    /// Build every component from a validated configuration
    pub fn new(config: RelabelConfig) -> Result<Self> {
        config.validate()?;

        let inventory = config
            .inventory_file
            .as_ref()
            .map(|path| Arc::new(InventorySource::new(path, config.inventory_interval())));

        let mut service = MetadataService::new();
        if let Some(inventory) = &inventory {
            service = service.with_fallback(inventory.clone());
        }
        let service = Arc::new(service);

        let collector = CadvisorCollector::new(CollectorConfig::from(&config), service.clone())?;
        let server = MetricsServer::new();
        let publisher = PeriodicPublisher::new(
            Arc::new(collector),
            server.clone(),
            config.fetch_interval(),
        )
        .with_labels(config.add_labels.clone(), config.label_defaults.clone());

        Ok(Self {
            config,
            service,
            inventory,
            server,
            publisher,
        })
    }

    pub fn service(&self) -> &Arc<MetadataService> {
        &self.service
    }

    pub fn server(&self) -> &MetricsServer {
        &self.server
    }

    /// Run until `cancel` fires or the HTTP server fails
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));

        let events = match &self.inventory {
            Some(inventory) => {
                // Seed the cache so the first cycle has targets
                match inventory.poll().await {
                    Ok(events) => events.iter().for_each(|event| self.service.apply(event)),
                    Err(e) => warn!("Initial inventory load failed: {}", e),
                }
                info!("Metadata cache seeded: {}", self.service.debug_string());
                Some(inventory.start().await?)
            }
            None => {
                warn!("No inventory file configured, no nodes will be scraped");
                None
            }
        };

        let server = async {
            let result = self.server.run(addr, cancel.clone()).await;
            if result.is_err() {
                cancel.cancel();
            }
            result
        };
        let pump = async {
            if let Some(events) = events {
                self.service.run(events, cancel.clone()).await;
            }
        };

        info!("Agent started on {}", addr);
        let (server_result, (), ()) =
            tokio::join!(server, pump, self.publisher.run(cancel.clone()));

        if let Some(inventory) = &self.inventory {
            inventory.stop().await?;
        }

        info!("Agent stopped");
        server_result
    }
}
