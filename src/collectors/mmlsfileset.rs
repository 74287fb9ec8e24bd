//! Fileset inventory collector (`mmlsfileset <fs> -Y`).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use prometheus::{GaugeVec, Opts, Registry};
use tracing::error;

use super::{resolve_filesystems, CollectError, Collector, Scrape, NAMESPACE};
use crate::cache::LastGoodMap;
use crate::config::Config;
use crate::parser::{parse_float, parse_mm_time, parse_section, FieldSetter};

const MMLSFILESET: &str = "/usr/lpp/mmfs/bin/mmlsfileset";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fileset {
    pub filesystem: String,
    pub name: String,
    pub status: String,
    pub created: Option<f64>,
    pub used_inodes: f64,
    pub max_inodes: f64,
    pub alloc_inodes: f64,
}

const FILESET_FIELDS: &[(&str, FieldSetter<Fileset>)] = &[
    ("filesystemName", |r, v| {
        r.filesystem = v.to_string();
        Ok(())
    }),
    ("filesetName", |r, v| {
        r.name = v.to_string();
        Ok(())
    }),
    ("status", |r, v| {
        r.status = v.to_string();
        Ok(())
    }),
    // Deleted filesets carry no creation time.
    ("created", |r, v| {
        if !v.is_empty() {
            r.created = Some(parse_mm_time("created", v)?);
        }
        Ok(())
    }),
    ("inodes", |r, v| {
        if !v.is_empty() {
            r.used_inodes = parse_float("inodes", v)?;
        }
        Ok(())
    }),
    ("maxInodes", |r, v| {
        if !v.is_empty() {
            r.max_inodes = parse_float("maxInodes", v)?;
        }
        Ok(())
    }),
    ("allocInodes", |r, v| {
        if !v.is_empty() {
            r.alloc_inodes = parse_float("allocInodes", v)?;
        }
        Ok(())
    }),
];

struct FilesetMetrics {
    status_info: GaugeVec,
    created: GaugeVec,
    max_inodes: GaugeVec,
    alloc_inodes: GaugeVec,
    free_inodes: GaugeVec,
}

impl FilesetMetrics {
    fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let gauge = |name: &str, help: &str, labels: &[&str]| {
            GaugeVec::new(
                Opts::new(name, help)
                    .namespace(NAMESPACE)
                    .subsystem("fileset"),
                labels,
            )
        };
        let metrics = Self {
            status_info: gauge(
                "status_info",
                "Fileset link status",
                &["fs", "fileset", "status"],
            )?,
            created: gauge(
                "created_timestamp_seconds",
                "Fileset creation time",
                &["fs", "fileset"],
            )?,
            max_inodes: gauge("max_inodes", "Fileset maximum inodes", &["fs", "fileset"])?,
            alloc_inodes: gauge("alloc_inodes", "Fileset allocated inodes", &["fs", "fileset"])?,
            free_inodes: gauge("free_inodes", "Fileset free allocated inodes", &["fs", "fileset"])?,
        };
        registry.register(Box::new(metrics.status_info.clone()))?;
        registry.register(Box::new(metrics.created.clone()))?;
        registry.register(Box::new(metrics.max_inodes.clone()))?;
        registry.register(Box::new(metrics.alloc_inodes.clone()))?;
        registry.register(Box::new(metrics.free_inodes.clone()))?;
        Ok(metrics)
    }

    fn emit(&self, filesets: &[Fileset]) {
        for fileset in filesets {
            let labels = [fileset.filesystem.as_str(), fileset.name.as_str()];
            self.status_info
                .with_label_values(&[&fileset.filesystem, &fileset.name, &fileset.status])
                .set(1.0);
            if let Some(created) = fileset.created {
                self.created.with_label_values(&labels).set(created);
            }
            self.max_inodes.with_label_values(&labels).set(fileset.max_inodes);
            self.alloc_inodes
                .with_label_values(&labels)
                .set(fileset.alloc_inodes);
            self.free_inodes
                .with_label_values(&labels)
                .set(fileset.alloc_inodes - fileset.used_inodes);
        }
    }
}

pub struct MmlsfilesetCollector {
    timeout: Duration,
    mmlsfs_timeout: Duration,
    filesystems: Option<Vec<String>>,
    cache: LastGoodMap<Vec<Fileset>>,
}

impl MmlsfilesetCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.mmlsfileset_timeout,
            mmlsfs_timeout: config.mmlsfs_timeout,
            filesystems: config.mmlsfileset_filesystems.clone(),
            cache: LastGoodMap::new(),
        }
    }

    async fn scrape_fs(&self, scrape: &Scrape, fs: &str) -> Result<Vec<Fileset>, CollectError> {
        let output = scrape
            .runner
            .run(MMLSFILESET, &[fs, "-Y"], None, self.timeout)
            .await?;
        let text = String::from_utf8_lossy(&output);
        Ok(parse_section(&text, "mmlsfileset", "", FILESET_FIELDS)?)
    }

    async fn collect_fs(&self, scrape: &Scrape, metrics: &FilesetMetrics, fs: &str) {
        let started = Instant::now();
        let label = format!("mmlsfileset-{}", fs);
        match self.scrape_fs(scrape, fs).await {
            Ok(filesets) => {
                if scrape.use_cache {
                    self.cache.store(fs, &filesets);
                }
                metrics.emit(&filesets);
                scrape.metrics.report(&label, started, None);
            }
            Err(e) => {
                error!("mmlsfileset collection for {} failed: {}", fs, e);
                if scrape.use_cache {
                    if let Some(filesets) = self.cache.get(fs) {
                        metrics.emit(&filesets);
                    }
                }
                scrape.metrics.report(&label, started, Some(&e));
            }
        }
    }
}

#[async_trait]
impl Collector for MmlsfilesetCollector {
    fn name(&self) -> &'static str {
        "mmlsfileset"
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

        let metrics = FilesetMetrics::register(scrape.registry())?;
        join_all(
            filesystems
                .iter()
                .map(|fs| self.collect_fs(scrape, &metrics, fs)),
        )
        .await;
        Ok(())
    }
}
