//! Disk state collector (`mmlsdisk <fs> -Y`).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use prometheus::{GaugeVec, Opts, Registry};
use tracing::error;

use super::{emit_states, resolve_filesystems, CollectError, Collector, Scrape, NAMESPACE};
use crate::cache::LastGoodMap;
use crate::config::Config;
use crate::parser::{parse_section, FieldSetter};

const MMLSDISK: &str = "/usr/lpp/mmfs/bin/mmlsdisk";

/// Disk statuses reported by mmlsdisk. Anything else maps to `unknown`.
const KNOWN_STATUSES: &[&str] = &[
    "ready",
    "suspended",
    "to be emptied",
    "being emptied",
    "emptied",
    "replacing",
    "replacement",
];

const KNOWN_AVAILABILITIES: &[&str] = &["up", "down", "recovering", "unrecovered"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Disk {
    pub name: String,
    pub pool: String,
    pub metadata: bool,
    pub data: bool,
    pub status: String,
    pub availability: String,
}

fn decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

const DISK_FIELDS: &[(&str, FieldSetter<Disk>)] = &[
    ("nsdName", |r, v| {
        r.name = v.to_string();
        Ok(())
    }),
    ("storagePool", |r, v| {
        r.pool = v.to_string();
        Ok(())
    }),
    ("metadata", |r, v| {
        r.metadata = v.eq_ignore_ascii_case("yes");
        Ok(())
    }),
    ("data", |r, v| {
        r.data = v.eq_ignore_ascii_case("yes");
        Ok(())
    }),
    // Multi-word statuses arrive percent-encoded.
    ("status", |r, v| {
        r.status = decode(v);
        Ok(())
    }),
    ("availability", |r, v| {
        r.availability = decode(v);
        Ok(())
    }),
];

struct DiskMetrics {
    status: GaugeVec,
    availability: GaugeVec,
    metadata: GaugeVec,
    data: GaugeVec,
}

impl DiskMetrics {
    fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self {
            status: GaugeVec::new(
                Opts::new("status", "Disk status (1 for the active status)")
                    .namespace(NAMESPACE)
                    .subsystem("disk"),
                &["fs", "disk", "pool", "status"],
            )?,
            availability: GaugeVec::new(
                Opts::new("availability", "Disk availability (1 for the active value)")
                    .namespace(NAMESPACE)
                    .subsystem("disk"),
                &["fs", "disk", "pool", "availability"],
            )?,
            metadata: GaugeVec::new(
                Opts::new("metadata", "Disk holds metadata")
                    .namespace(NAMESPACE)
                    .subsystem("disk"),
                &["fs", "disk", "pool"],
            )?,
            data: GaugeVec::new(
                Opts::new("data", "Disk holds data")
                    .namespace(NAMESPACE)
                    .subsystem("disk"),
                &["fs", "disk", "pool"],
            )?,
        };
        registry.register(Box::new(metrics.status.clone()))?;
        registry.register(Box::new(metrics.availability.clone()))?;
        registry.register(Box::new(metrics.metadata.clone()))?;
        registry.register(Box::new(metrics.data.clone()))?;
        Ok(metrics)
    }

    fn emit(&self, fs: &str, disks: &[Disk]) {
        for disk in disks {
            let labels = [fs, disk.name.as_str(), disk.pool.as_str()];
            emit_states(&self.status, &labels, KNOWN_STATUSES, "unknown", &disk.status);
            emit_states(
                &self.availability,
                &labels,
                KNOWN_AVAILABILITIES,
                "unknown",
                &disk.availability,
            );
            self.metadata
                .with_label_values(&labels)
                .set(if disk.metadata { 1.0 } else { 0.0 });
            self.data
                .with_label_values(&labels)
                .set(if disk.data { 1.0 } else { 0.0 });
        }
    }
}

pub struct MmlsdiskCollector {
    timeout: Duration,
    mmlsfs_timeout: Duration,
    filesystems: Option<Vec<String>>,
    cache: LastGoodMap<Vec<Disk>>,
}

impl MmlsdiskCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.mmlsdisk_timeout,
            mmlsfs_timeout: config.mmlsfs_timeout,
            filesystems: config.mmlsdisk_filesystems.clone(),
            cache: LastGoodMap::new(),
        }
    }

    async fn scrape_fs(&self, scrape: &Scrape, fs: &str) -> Result<Vec<Disk>, CollectError> {
        let output = scrape
            .runner
            .run(MMLSDISK, &[fs, "-Y"], None, self.timeout)
            .await?;
        let text = String::from_utf8_lossy(&output);
        Ok(parse_section(&text, "mmlsdisk", "", DISK_FIELDS)?)
    }

    async fn collect_fs(&self, scrape: &Scrape, metrics: &DiskMetrics, fs: &str) {
        let started = Instant::now();
        let label = format!("mmlsdisk-{}", fs);
        match self.scrape_fs(scrape, fs).await {
            Ok(disks) => {
                if scrape.use_cache {
                    self.cache.store(fs, &disks);
                }
                metrics.emit(fs, &disks);
                scrape.metrics.report(&label, started, None);
            }
            Err(e) => {
                error!("mmlsdisk collection for {} failed: {}", fs, e);
                if scrape.use_cache {
                    if let Some(disks) = self.cache.get(fs) {
                        metrics.emit(fs, &disks);
                    }
                }
                scrape.metrics.report(&label, started, Some(&e));
            }
        }
    }
}

#[async_trait]
impl Collector for MmlsdiskCollector {
    fn name(&self) -> &'static str {
        "mmlsdisk"
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

        let metrics = DiskMetrics::register(scrape.registry())?;
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
mmlsdisk::HEADER:version:reserved:reserved:nsdName:driverType:sectorSize:failureGroup:metadata:data:status:availability:diskID:storagePool:remarks:
mmlsdisk::0:1:::nsd01:nsd:512:1:Yes:Yes:ready:up:1:system:desc:
mmlsdisk::0:1:::nsd02:nsd:512:2:no:yes:to%20be%20emptied:down:2:data::
";

    fn collector() -> MmlsdiskCollector {
        let mut collector = MmlsdiskCollector::new(&Config::default());
        collector.filesystems = Some(vec!["project".to_string()]);
        collector
    }

    #[tokio::test]
    async fn test_disk_states() {
        let runner = MockRunner::new().with_output("/usr/lpp/mmfs/bin/mmlsdisk project -Y", OUTPUT);
        let scrape = Scrape::new(Arc::new(runner), false).unwrap();
        collector().collect(&scrape).await.unwrap();
        let registry = scrape.into_registry();

        assert_eq!(
            sample_value(
                &registry,
                "gpfs_disk_status",
                &[("fs", "project"), ("disk", "nsd01"), ("status", "ready")]
            ),
            Some(1.0)
        );
        // Percent-encoded multi-word status decodes before matching.
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_disk_status",
                &[("disk", "nsd02"), ("status", "to be emptied")]
            ),
            Some(1.0)
        );
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_disk_status",
                &[("disk", "nsd02"), ("status", "unknown")]
            ),
            Some(0.0)
        );
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_disk_availability",
                &[("disk", "nsd02"), ("availability", "down")]
            ),
            Some(1.0)
        );
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_disk_metadata",
                &[("disk", "nsd02"), ("pool", "data")]
            ),
            Some(0.0)
        );
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_disk_data",
                &[("disk", "nsd01"), ("pool", "system")]
            ),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_failure_reported_per_filesystem() {
        let runner = MockRunner::new().with_failure("/usr/lpp/mmfs/bin/mmlsdisk project -Y");
        let scrape = Scrape::new(Arc::new(runner), false).unwrap();
        collector().collect(&scrape).await.unwrap();
        let registry = scrape.into_registry();
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_exporter_collect_error",
                &[("collector", "mmlsdisk-project")]
            ),
            Some(1.0)
        );
    }
}
