//! Snapshot inventory collector (`mmlssnapshot <fs> -Y`).
//!
//! One invocation per filesystem. Snapshot sizes are only available with
//! `-d`, which walks the snapshot and can take minutes on a large
//! filesystem, so size collection is a separate opt-in.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use prometheus::{GaugeVec, Opts, Registry};
use tracing::error;

use super::{resolve_filesystems, CollectError, Collector, Scrape, NAMESPACE};
use crate::cache::LastGoodMap;
use crate::config::Config;
use crate::parser::{parse_kb, parse_mm_time, parse_section, FieldSetter};

const MMLSSNAPSHOT: &str = "/usr/lpp/mmfs/bin/mmlssnapshot";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub filesystem: String,
    pub name: String,
    pub fileset: String,
    pub status: String,
    pub created: f64,
    pub data_bytes: Option<f64>,
    pub metadata_bytes: Option<f64>,
}

const SNAPSHOT_FIELDS: &[(&str, FieldSetter<Snapshot>)] = &[
    ("filesystemName", |r, v| {
        r.filesystem = v.to_string();
        Ok(())
    }),
    ("directory", |r, v| {
        r.name = v.to_string();
        Ok(())
    }),
    ("fileset", |r, v| {
        r.fileset = v.to_string();
        Ok(())
    }),
    ("status", |r, v| {
        r.status = v.to_string();
        Ok(())
    }),
    ("created", |r, v| {
        r.created = parse_mm_time("created", v)?;
        Ok(())
    }),
    // Size columns are empty unless the snapshot was listed with -d.
    ("data", |r, v| {
        if !v.is_empty() {
            r.data_bytes = Some(parse_kb("data", v)?);
        }
        Ok(())
    }),
    ("metadata", |r, v| {
        if !v.is_empty() {
            r.metadata_bytes = Some(parse_kb("metadata", v)?);
        }
        Ok(())
    }),
];

struct SnapshotMetrics {
    status_info: GaugeVec,
    created: GaugeVec,
    data_size: GaugeVec,
    metadata_size: GaugeVec,
}

impl SnapshotMetrics {
    fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let gauge = |name: &str, help: &str, labels: &[&str]| {
            GaugeVec::new(
                Opts::new(name, help)
                    .namespace(NAMESPACE)
                    .subsystem("snapshot"),
                labels,
            )
        };
        let metrics = Self {
            status_info: gauge(
                "status_info",
                "Snapshot status",
                &["fs", "fileset", "snapshot", "status"],
            )?,
            created: gauge(
                "created_timestamp_seconds",
                "Snapshot creation time",
                &["fs", "fileset", "snapshot"],
            )?,
            data_size: gauge(
                "data_size_bytes",
                "Snapshot data size",
                &["fs", "fileset", "snapshot"],
            )?,
            metadata_size: gauge(
                "metadata_size_bytes",
                "Snapshot metadata size",
                &["fs", "fileset", "snapshot"],
            )?,
        };
        registry.register(Box::new(metrics.status_info.clone()))?;
        registry.register(Box::new(metrics.created.clone()))?;
        registry.register(Box::new(metrics.data_size.clone()))?;
        registry.register(Box::new(metrics.metadata_size.clone()))?;
        Ok(metrics)
    }

    fn emit(&self, snapshots: &[Snapshot]) {
        for snap in snapshots {
            self.status_info
                .with_label_values(&[&snap.filesystem, &snap.fileset, &snap.name, &snap.status])
                .set(1.0);
            self.created
                .with_label_values(&[&snap.filesystem, &snap.fileset, &snap.name])
                .set(snap.created);
            if let Some(bytes) = snap.data_bytes {
                self.data_size
                    .with_label_values(&[&snap.filesystem, &snap.fileset, &snap.name])
                    .set(bytes);
            }
            if let Some(bytes) = snap.metadata_bytes {
                self.metadata_size
                    .with_label_values(&[&snap.filesystem, &snap.fileset, &snap.name])
                    .set(bytes);
            }
        }
    }
}

pub struct MmlssnapshotCollector {
    timeout: Duration,
    mmlsfs_timeout: Duration,
    filesystems: Option<Vec<String>>,
    get_size: bool,
    cache: LastGoodMap<Vec<Snapshot>>,
}

impl MmlssnapshotCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.mmlssnapshot_timeout,
            mmlsfs_timeout: config.mmlsfs_timeout,
            filesystems: config.mmlssnapshot_filesystems.clone(),
            get_size: config.mmlssnapshot_get_size,
            cache: LastGoodMap::new(),
        }
    }

    async fn scrape_fs(&self, scrape: &Scrape, fs: &str) -> Result<Vec<Snapshot>, CollectError> {
        let mut args = vec![fs, "-Y"];
        if self.get_size {
            args.push("-d");
        }
        let output = scrape
            .runner
            .run(MMLSSNAPSHOT, &args, None, self.timeout)
            .await?;
        let text = String::from_utf8_lossy(&output);
        Ok(parse_section(&text, "mmlssnapshot", "", SNAPSHOT_FIELDS)?)
    }

    async fn collect_fs(&self, scrape: &Scrape, metrics: &SnapshotMetrics, fs: &str) {
        let started = Instant::now();
        let label = format!("mmlssnapshot-{}", fs);
        match self.scrape_fs(scrape, fs).await {
            Ok(snapshots) => {
                if scrape.use_cache {
                    self.cache.store(fs, &snapshots);
                }
                metrics.emit(&snapshots);
                scrape.metrics.report(&label, started, None);
            }
            Err(e) => {
                error!("mmlssnapshot collection for {} failed: {}", fs, e);
                if scrape.use_cache {
                    if let Some(snapshots) = self.cache.get(fs) {
                        metrics.emit(&snapshots);
                    }
                }
                scrape.metrics.report(&label, started, Some(&e));
            }
        }
    }
}

#[async_trait]
impl Collector for MmlssnapshotCollector {
    fn name(&self) -> &'static str {
        "mmlssnapshot"
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

        let metrics = SnapshotMetrics::register(scrape.registry())?;
        join_all(
            filesystems
                .iter()
                .map(|fs| self.collect_fs(scrape, &metrics, fs)),
        )
        .await;
        Ok(())
    }
}
