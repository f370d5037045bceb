//! Collection cycle over every known node.

use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::config::CollectorConfig;
use super::core::Collector;
use super::scrape::{NodeScraper, ScrapeError};
use crate::error::{RelabelError, Result};
use crate::labels::EnrichmentSpec;
use crate::processor::LabelProcessor;
use crate::relation::RelationBuilder;
use crate::service::MetadataService;

type NodeResults = (BTreeMap<String, String>, BTreeMap<String, ScrapeError>);

/// Scrapes every cached node address and enriches the merged payload
pub struct CadvisorCollector {
    name: String,
    scraper: NodeScraper,
    service: Arc<MetadataService>,
    processor: LabelProcessor,
    relation: RelationBuilder,
}

impl CadvisorCollector {
    /// Create a collector reading targets and labels from `service`
    pub fn new(config: CollectorConfig, service: Arc<MetadataService>) -> Result<Self> {
        let relation = RelationBuilder::new(config.relation_modulus);
        Ok(Self {
            name: config.name.clone(),
            scraper: NodeScraper::new(config)?,
            service,
            processor: LabelProcessor::new(),
            relation,
        })
    }

    /// Replace the label processor
    pub fn with_processor(mut self, processor: LabelProcessor) -> Self {
        self.processor = processor;
        self
    }

    pub fn service(&self) -> &Arc<MetadataService> {
        &self.service
    }

    async fn fan_out(
        &self,
        addresses: &[String],
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<NodeResults> {
        let config = self.scraper.config();
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_scrapes.max(1)));
        let token: Arc<str> = Arc::from(token);
        let mut tasks = JoinSet::new();

        for address in addresses {
            let semaphore = Arc::clone(&semaphore);
            let scraper = self.scraper.clone();
            let token = Arc::clone(&token);
            let address = address.clone();

            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => scraper.scrape(&address, &token).await,
                    Err(e) => Err(ScrapeError::Request(e.to_string())),
                };
                (address, result)
            });
        }

        let mut successes = BTreeMap::new();
        let mut failures = BTreeMap::new();

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    warn!("Collection cancelled with {} node requests outstanding", tasks.len());
                    return Err(RelabelError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };

            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok((address, Ok(body))) => {
                    successes.insert(address, body);
                }
                Ok((address, Err(e))) => {
                    error!("Failed to scrape cadvisor metrics from {}: {}", address, e);
                    failures.insert(address, e);
                }
                Err(e) => error!("Scrape task did not complete: {}", e),
            }
        }

        Ok((successes, failures))
    }
}

#[async_trait::async_trait]
impl Collector for CadvisorCollector {
    async fn collect(
        &self,
        cancel: &CancellationToken,
        add_labels: &str,
        label_defaults: &str,
    ) -> Result<String> {
        let addresses = self.service.addresses();
        if addresses.is_empty() {
            return Err(RelabelError::NoTargets(
                "no node addresses are known".to_string(),
            ));
        }

        let token = read_token(&self.scraper.config().token_file).await?;

        info!("Collecting cadvisor metrics from {} nodes", addresses.len());
        let (successes, failures) = self.fan_out(&addresses, &token, cancel).await?;

        if successes.is_empty() {
            return Err(RelabelError::AllScrapesFailed {
                attempted: addresses.len(),
            });
        }
        if !failures.is_empty() {
            warn!(
                "cadvisor scrape failed for {} of {} nodes",
                failures.len(),
                addresses.len()
            );
        }

        let mut payload = annotate_failures(combine_payloads(&successes), &failures);

        let spec = EnrichmentSpec::parse(add_labels, label_defaults);
        let relation = self
            .relation
            .build(&spec, |key| self.service.unique_values(key));
        if !relation.is_empty() {
            if !payload.is_empty() && !payload.ends_with('\n') {
                payload.push('\n');
            }
            payload.push_str(&relation);
        }

        if spec.is_empty() {
            return Ok(payload);
        }

        debug!(
            "Enriching metrics with labels {:?} (defaults: {:?})",
            spec.labels(),
            label_defaults
        );
        let enriched = self.processor.enrich(&payload, &spec, |namespace, name| {
            self.service.workload_labels(namespace, name)
        });
        info!(
            "Metrics enrichment completed ({} bytes -> {} bytes)",
            payload.len(),
            enriched.len()
        );

        Ok(enriched)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Read the bearer token, trimmed
async fn read_token(path: &Path) -> Result<String> {
    let token = tokio::fs::read_to_string(path).await.map_err(|e| {
        RelabelError::Credential(format!("read token file {}: {}", path.display(), e))
    })?;

    let token = token.trim();
    if token.is_empty() {
        return Err(RelabelError::Credential(format!(
            "token file {} is empty",
            path.display()
        )));
    }

    Ok(token.to_string())
}

/// Concatenate node payloads in address order, each under a marker comment
pub fn combine_payloads(payloads: &BTreeMap<String, String>) -> String {
    let mut output = String::new();

    for (address, body) in payloads {
        output.push_str("# -------- Node: ");
        output.push_str(address);
        output.push_str(" --------\n");
        output.push_str(body);
        if !body.ends_with('\n') {
            output.push('\n');
        }
    }

    output
}

/// Prepend one comment line listing every failed node and its error
pub fn annotate_failures(payload: String, failures: &BTreeMap<String, ScrapeError>) -> String {
    if failures.is_empty() {
        return payload;
    }

    let parts: Vec<String> = failures
        .iter()
        .map(|(address, err)| format!("{}={}", address, err.summary()))
        .collect();

    let mut output = String::with_capacity(payload.len() + 64);
    output.push_str("# scrape failures: ");
    output.push_str(&parts.join("; "));
    output.push('\n');
    output.push_str(&payload);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use tokio::net::TcpListener;

    use crate::cache::LabelSet;
    use crate::collector::config::CollectorConfigBuilder;
    use crate::relation::{RELATION_MODULUS, relation_digest};

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        address
    }

    async fn serve_text(status: StatusCode, body: &'static str) -> String {
        serve(Router::new().route("/metrics/cadvisor", get(move || async move { (status, body) }))).await
    }

    fn token_file(contents: &str) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), contents).unwrap();
        file
    }

    fn collector(token: &NamedTempFile, service: Arc<MetadataService>, max_concurrent: usize) -> CadvisorCollector {
        let config = CollectorConfigBuilder::new("test")
            .endpoint("http://{address}/metrics/cadvisor")
            .token_file(token.path())
            .request_timeout(Duration::from_secs(5))
            .max_concurrent_scrapes(max_concurrent)
            .build();
        CadvisorCollector::new(config, service).unwrap()
    }

    fn service_with_nodes(addresses: &[&str]) -> Arc<MetadataService> {
        let service = MetadataService::new();
        for (i, address) in addresses.iter().enumerate() {
            service.on_node_address_changed(&format!("node-{}", i), address);
        }
        Arc::new(service)
    }

    #[test]
    fn test_combine_payloads_sorted_with_markers() {
        let payloads = BTreeMap::from([
            ("10.0.0.2".to_string(), "b 2".to_string()),
            ("10.0.0.1".to_string(), "a 1\n".to_string()),
        ]);
        assert_eq!(
            combine_payloads(&payloads),
            "# -------- Node: 10.0.0.1 --------\na 1\n# -------- Node: 10.0.0.2 --------\nb 2\n"
        );
        assert_eq!(combine_payloads(&BTreeMap::new()), "");
    }

    #[test]
    fn test_annotate_failures() {
        let failures = BTreeMap::from([
            ("10.0.0.3".to_string(), ScrapeError::Request("timed out".to_string())),
            (
                "10.0.0.1".to_string(),
                ScrapeError::Status {
                    status: 403,
                    body: "forbidden".to_string(),
                },
            ),
        ]);
        assert_eq!(
            annotate_failures("up 1\n".to_string(), &failures),
            "# scrape failures: 10.0.0.1=unexpected status code 403: forbidden; 10.0.0.3=execute request: timed out\nup 1\n"
        );
        assert_eq!(annotate_failures("up 1\n".to_string(), &BTreeMap::new()), "up 1\n");
    }

    #[tokio::test]
    async fn test_no_targets() {
        let token = token_file("secret");
        let collector = collector(&token, Arc::new(MetadataService::new()), 10);

        let result = collector.collect(&CancellationToken::new(), "", "").await;
        assert!(matches!(result, Err(RelabelError::NoTargets(_))));
    }

    #[tokio::test]
    async fn test_credential_errors() {
        let service = service_with_nodes(&["127.0.0.1:1"]);

        let blank = token_file("  \n");
        let result = collector(&blank, service.clone(), 10)
            .collect(&CancellationToken::new(), "", "")
            .await;
        assert!(matches!(result, Err(RelabelError::Credential(_))));

        let missing = token_file("x");
        let config = CollectorConfigBuilder::new("test")
            .token_file(missing.path().with_extension("missing"))
            .build();
        let result = CadvisorCollector::new(config, service)
            .unwrap()
            .collect(&CancellationToken::new(), "", "")
            .await;
        assert!(matches!(result, Err(RelabelError::Credential(_))));
    }

    #[tokio::test]
    async fn test_partial_failure_is_annotated() {
        let healthy = serve_text(StatusCode::OK, "up 1").await;
        let broken = serve_text(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
        let token = token_file("secret\n");
        let collector = collector(&token, service_with_nodes(&[healthy.as_str(), broken.as_str()]), 10);

        let payload = collector
            .collect(&CancellationToken::new(), "", "")
            .await
            .unwrap();

        let lines: Vec<&str> = payload.lines().collect();
        assert_eq!(
            lines,
            vec![
                format!("# scrape failures: {}=unexpected status code 500: boom", broken).as_str(),
                format!("# -------- Node: {} --------", healthy).as_str(),
                "up 1",
            ]
        );
        assert_eq!(payload.matches("# scrape failures:").count(), 1);
        assert!(payload.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_all_failed_reports_attempted() {
        let first = serve_text(StatusCode::FORBIDDEN, "no").await;
        let second = serve_text(StatusCode::BAD_GATEWAY, "no").await;
        let token = token_file("secret");
        let collector = collector(&token, service_with_nodes(&[first.as_str(), second.as_str()]), 10);

        let result = collector.collect(&CancellationToken::new(), "", "").await;
        assert!(matches!(result, Err(RelabelError::AllScrapesFailed { attempted: 2 })));
    }

    #[tokio::test]
    async fn test_sections_follow_address_order() {
        let mut addresses = Vec::new();
        for body in ["a 1", "b 1", "c 1"] {
            addresses.push(serve_text(StatusCode::OK, body).await);
        }
        let refs: Vec<&str> = addresses.iter().map(String::as_str).collect();
        let token = token_file("secret");
        let collector = collector(&token, service_with_nodes(&refs), 2);

        let payload = collector
            .collect(&CancellationToken::new(), "", "")
            .await
            .unwrap();

        let markers: Vec<&str> = payload
            .lines()
            .filter_map(|line| line.strip_prefix("# -------- Node: "))
            .map(|line| line.trim_end_matches(" --------"))
            .collect();
        let mut sorted = addresses.clone();
        sorted.sort();
        assert_eq!(markers, sorted);
    }

    #[tokio::test]
    async fn test_concurrency_ceiling() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut addresses = Vec::new();

        for _ in 0..4 {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            let router = Router::new().route(
                "/metrics/cadvisor",
                get(move || {
                    let in_flight = in_flight.clone();
                    let peak = peak.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        "up 1"
                    }
                }),
            );
            addresses.push(serve(router).await);
        }

        let refs: Vec<&str> = addresses.iter().map(String::as_str).collect();
        let token = token_file("secret");
        let collector = collector(&token, service_with_nodes(&refs), 1);

        collector
            .collect(&CancellationToken::new(), "", "")
            .await
            .unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_aborts_cycle() {
        let router = Router::new().route(
            "/metrics/cadvisor",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                "up 1"
            }),
        );
        let address = serve(router).await;
        let token = token_file("secret");
        let service = service_with_nodes(&[address.as_str()]);
        let collector = collector(&token, service.clone(), 10);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = collector.collect(&cancel, "", "").await;
        assert!(matches!(result, Err(RelabelError::Cancelled)));
        assert_eq!(service.addresses(), vec![address]);
    }

    #[tokio::test]
    async fn test_enrichment_and_relation() {
        let address = serve_text(
            StatusCode::OK,
            "# TYPE container_cpu counter\ncontainer_cpu{namespace=\"shop\",pod=\"web-0\"} 5\ncontainer_cpu{namespace=\"shop\",pod=\"gone\"} 2\n",
        )
        .await;
        let token = token_file("secret");
        let service = service_with_nodes(&[address.as_str()]);
        service.on_workload_labels_changed(
            "shop",
            "web-0",
            &LabelSet::from([("app".to_string(), "web".to_string())]),
        );
        let collector = collector(&token, service, 10);

        let payload = collector
            .collect(&CancellationToken::new(), "app", "unknown")
            .await
            .unwrap();

        assert!(payload.contains("container_cpu{namespace=\"shop\",pod=\"web-0\",app=\"web\"} 5\n"));
        assert!(payload.contains("container_cpu{namespace=\"shop\",pod=\"gone\",app=\"unknown\"} 2\n"));
        assert!(payload.contains("# TYPE container_cpu counter\n"));
        assert!(payload.contains(&format!(
            "kubelet_cadvisor_label_relation{{label_key=\"app\",label_value=\"web\"}} {}\n",
            relation_digest("web", RELATION_MODULUS)
        )));
        assert!(payload.contains("label_value=\"unknown\"}"));
    }
}
