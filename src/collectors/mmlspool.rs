//! Storage pool collector (`mmlspool <fs>`).
//!
//! mmlspool has no machine-readable mode, so this parses the human table:
//! a `Name ...` header line followed by one row per pool whose KB columns
//! are each trailed by a `( nn%)` percentage. The percentage tokens are
//! stripped before the columns are consumed positionally from the right.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use prometheus::{GaugeVec, Opts, Registry};
use tracing::error;

use super::{resolve_filesystems, CollectError, Collector, Scrape, NAMESPACE};
use crate::cache::LastGoodMap;
use crate::config::Config;
use crate::parser::{parse_kb, ParseError};

const MMLSPOOL: &str = "/usr/lpp/mmfs/bin/mmlspool";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pool {
    pub name: String,
    pub total_data_bytes: f64,
    pub free_data_bytes: f64,
    pub total_meta_bytes: f64,
    pub free_meta_bytes: f64,
}

/// Parses the pool table. Lines before the `Name` header and rows without a
/// numeric pool id are ignored.
pub fn parse_pools(output: &str) -> Result<Vec<Pool>, ParseError> {
    let mut pools = Vec::new();
    let mut in_table = false;

    for line in output.lines() {
        if !in_table {
            in_table = line.trim_start().starts_with("Name");
            continue;
        }
        let tokens: Vec<&str> = line
            .split_whitespace()
            .filter(|t| !t.starts_with('(') && !t.ends_with("%)"))
            .collect();
        if tokens.len() < 5 || tokens[1].parse::<u64>().is_err() {
            continue;
        }
        let kb = tokens[tokens.len() - 4..].to_vec();
        pools.push(Pool {
            name: tokens[0].to_string(),
            total_data_bytes: parse_kb("totalData", kb[0])?,
            free_data_bytes: parse_kb("freeData", kb[1])?,
            total_meta_bytes: parse_kb("totalMeta", kb[2])?,
            free_meta_bytes: parse_kb("freeMeta", kb[3])?,
        });
    }
    Ok(pools)
}

struct PoolMetrics {
    total_data: GaugeVec,
    free_data: GaugeVec,
    total_meta: GaugeVec,
    free_meta: GaugeVec,
}

impl PoolMetrics {
    fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let gauge = |name: &str, help: &str| {
            GaugeVec::new(
                Opts::new(name, help).namespace(NAMESPACE).subsystem("pool"),
                &["fs", "pool"],
            )
        };
        let metrics = Self {
            total_data: gauge("total_data_bytes", "Pool total data capacity in bytes")?,
            free_data: gauge("free_data_bytes", "Pool free data capacity in bytes")?,
            total_meta: gauge("total_meta_bytes", "Pool total metadata capacity in bytes")?,
            free_meta: gauge("free_meta_bytes", "Pool free metadata capacity in bytes")?,
        };
        registry.register(Box::new(metrics.total_data.clone()))?;
        registry.register(Box::new(metrics.free_data.clone()))?;
        registry.register(Box::new(metrics.total_meta.clone()))?;
        registry.register(Box::new(metrics.free_meta.clone()))?;
        Ok(metrics)
    }

    fn emit(&self, fs: &str, pools: &[Pool]) {
        for pool in pools {
            let labels = [fs, pool.name.as_str()];
            self.total_data
                .with_label_values(&labels)
                .set(pool.total_data_bytes);
            self.free_data
                .with_label_values(&labels)
                .set(pool.free_data_bytes);
            self.total_meta
                .with_label_values(&labels)
                .set(pool.total_meta_bytes);
            self.free_meta
                .with_label_values(&labels)
                .set(pool.free_meta_bytes);
        }
    }
}

pub struct MmlspoolCollector {
    timeout: Duration,
    mmlsfs_timeout: Duration,
    filesystems: Option<Vec<String>>,
    cache: LastGoodMap<Vec<Pool>>,
}

impl MmlspoolCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.mmlspool_timeout,
            mmlsfs_timeout: config.mmlsfs_timeout,
            filesystems: config.mmlspool_filesystems.clone(),
            cache: LastGoodMap::new(),
        }
    }

    async fn scrape_fs(&self, scrape: &Scrape, fs: &str) -> Result<Vec<Pool>, CollectError> {
        let output = scrape.runner.run(MMLSPOOL, &[fs], None, self.timeout).await?;
        Ok(parse_pools(&String::from_utf8_lossy(&output))?)
    }

    async fn collect_fs(&self, scrape: &Scrape, metrics: &PoolMetrics, fs: &str) {
        let started = Instant::now();
        let label = format!("mmlspool-{}", fs);
        match self.scrape_fs(scrape, fs).await {
            Ok(pools) => {
                if scrape.use_cache {
                    self.cache.store(fs, &pools);
                }
                metrics.emit(fs, &pools);
                scrape.metrics.report(&label, started, None);
            }
            Err(e) => {
                error!("mmlspool collection for {} failed: {}", fs, e);
                if scrape.use_cache {
                    if let Some(pools) = self.cache.get(fs) {
                        metrics.emit(fs, &pools);
                    }
                }
                scrape.metrics.report(&label, started, Some(&e));
            }
        }
    }
}

#[async_trait]
impl Collector for MmlspoolCollector {
    fn name(&self) -> &'static str {
        "mmlspool"
    }

    async fn collect(&self, scrape: &Scrape) -> Result<(), prometheus::Error> {
        let Some(filesystems) = resolve_filesystems(
            scrape,
            self.filesystems.as_deref(),
            self.name(),
            self.mmlsfs_timeout,
        )
        .await
        else {
            return Ok(());
        };

        let metrics = PoolMetrics::register(scrape.registry())?;
        join_all(
            filesystems
                .iter()
                .map(|fs| self.collect_fs(scrape, &metrics, fs)),
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockRunner;
    use crate::testutil::sample_value;
    use std::sync::Arc;

    const OUTPUT: &str = "\
Storage pools in file system at '/fs/project':
Name                    Id   BlkSize Data Meta Total Data in (KB)   Free Data in (KB)   Total Meta in (KB)    Free Meta in (KB)
system                   0      4 MB  yes  yes      750817888256        110836941824 ( 15%)      750817888256        690109946880 ( 92%)
data                 65537     16 MB  yes   no     2896660840448       1366372708352 ( 47%)                 0                   0 (  0%)
";

    #[test]
    fn test_parse_pools() {
        let pools = parse_pools(OUTPUT).unwrap();
        assert_eq!(pools.len(), 2);
        assert_eq!(pools[0].name, "system");
        assert_eq!(pools[0].total_data_bytes, 768837517574144.0);
        assert_eq!(pools[0].free_meta_bytes, 706672585605120.0);
        assert_eq!(pools[1].name, "data");
        assert_eq!(pools[1].free_data_bytes, 1399165653352448.0);
        assert_eq!(pools[1].total_meta_bytes, 0.0);
    }

    #[tokio::test]
    async fn test_pool_metrics() {
        let mut collector = MmlspoolCollector::new(&Config::default());
        collector.filesystems = Some(vec!["project".to_string()]);
        let runner = MockRunner::new().with_output("/usr/lpp/mmfs/bin/mmlspool project", OUTPUT);
        let scrape = Scrape::new(Arc::new(runner), false).unwrap();
        collector.collect(&scrape).await.unwrap();
        let registry = scrape.into_registry();

        assert_eq!(
            sample_value(
                &registry,
                "gpfs_pool_total_data_bytes",
                &[("fs", "project"), ("pool", "system")]
            ),
            Some(768837517574144.0)
        );
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_pool_free_data_bytes",
                &[("fs", "project"), ("pool", "data")]
            ),
            Some(1399165653352448.0)
        );
    }
}
