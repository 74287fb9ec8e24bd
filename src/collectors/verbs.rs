//! RDMA status collector (`mmfsadm test verbs status`).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use prometheus::{Gauge, Opts, Registry};
use tracing::error;

use super::{CollectError, Collector, Scrape, NAMESPACE};
use crate::cache::LastGood;
use crate::config::Config;

const MMFSADM: &str = "/usr/lpp/mmfs/bin/mmfsadm";

/// True when the daemon reports `VERBS RDMA status: started`.
pub fn parse_verbs_status(output: &str) -> bool {
    output
        .lines()
        .filter_map(|line| line.split_once("status:"))
        .any(|(_, status)| status.trim() == "started")
}

pub struct VerbsCollector {
    timeout: Duration,
    cache: LastGood<bool>,
}

impl VerbsCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.verbs_timeout,
            cache: LastGood::new(),
        }
    }

    async fn scrape(&self, scrape: &Scrape) -> Result<bool, CollectError> {
        let output = scrape
            .runner
            .run(MMFSADM, &["test", "verbs", "status"], None, self.timeout)
            .await?;
        Ok(parse_verbs_status(&String::from_utf8_lossy(&output)))
    }

    fn emit(&self, registry: &Registry, started: bool) -> Result<(), prometheus::Error> {
        let status = Gauge::with_opts(
            Opts::new("status", "VERBS RDMA is started")
                .namespace(NAMESPACE)
                .subsystem("verbs"),
        )?;
        registry.register(Box::new(status.clone()))?;
        status.set(if started { 1.0 } else { 0.0 });
        Ok(())
    }
}

#[async_trait]
impl Collector for VerbsCollector {
    fn name(&self) -> &'static str {
        "verbs"
    }

    async fn collect(&self, scrape: &Scrape) -> Result<(), prometheus::Error> {
        let started = Instant::now();
        match self.scrape(scrape).await {
            Ok(up) => {
                if scrape.use_cache {
                    self.cache.store(&up);
                }
                self.emit(scrape.registry(), up)?;
                scrape.metrics.report(self.name(), started, None);
            }
            Err(e) => {
                error!("verbs collector failed: {}", e);
                if scrape.use_cache {
                    if let Some(up) = self.cache.get() {
                        self.emit(scrape.registry(), up)?;
                    }
                }
                scrape.metrics.report(self.name(), started, Some(&e));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockRunner;
    use crate::testutil::sample_value;
    use std::sync::Arc;

    #[test]
    fn test_parse_verbs_status() {
        assert!(parse_verbs_status("VERBS RDMA status: started\n"));
        assert!(!parse_verbs_status("VERBS RDMA status: not started\n"));
        assert!(!parse_verbs_status(""));
    }

    #[tokio::test]
    async fn test_status_gauge() {
        let runner = MockRunner::new().with_output(
            "/usr/lpp/mmfs/bin/mmfsadm test verbs status",
            "VERBS RDMA status: started\n",
        );
        let scrape = Scrape::new(Arc::new(runner), false).unwrap();
        VerbsCollector::new(&Config::default())
            .collect(&scrape)
            .await
            .unwrap();
        let registry = scrape.into_registry();
        assert_eq!(sample_value(&registry, "gpfs_verbs_status", &[]), Some(1.0));
    }

    #[tokio::test]
    async fn test_not_started() {
        let runner = MockRunner::new().with_output(
            "/usr/lpp/mmfs/bin/mmfsadm test verbs status",
            "VERBS RDMA status: not started\n",
        );
        let scrape = Scrape::new(Arc::new(runner), false).unwrap();
        VerbsCollector::new(&Config::default())
            .collect(&scrape)
            .await
            .unwrap();
        let registry = scrape.into_registry();
        assert_eq!(sample_value(&registry, "gpfs_verbs_status", &[]), Some(0.0));
    }
}
