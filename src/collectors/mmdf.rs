//! Capacity collector (`mmdf <fs> -Y`).
//!
//! One invocation per filesystem, in parallel. The output carries several
//! sections: inode counts, filesystem totals, an optional metadata section
//! (only on filesystems with separate metadata) and one row per storage
//! pool. All block values arrive in KB and are exposed in bytes.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use prometheus::{GaugeVec, Opts, Registry};
use tracing::error;

use super::{resolve_filesystems, CollectError, Collector, Scrape, NAMESPACE};
use crate::cache::LastGoodMap;
use crate::config::Config;
use crate::parser::{parse_float, parse_kb, parse_section, FieldSetter};

const MMDF: &str = "/usr/lpp/mmfs/bin/mmdf";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InodeUsage {
    pub used: f64,
    pub free: f64,
    pub allocated: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockUsage {
    pub size_bytes: f64,
    pub free_bytes: f64,
    pub free_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolUsage {
    pub name: String,
    pub total_bytes: f64,
    pub free_bytes: f64,
    pub free_fragments_bytes: f64,
    pub max_disk_size_bytes: f64,
}

/// Everything mmdf reports about one filesystem.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FsUsage {
    pub inode: Option<InodeUsage>,
    pub total: Option<BlockUsage>,
    pub metadata: Option<BlockUsage>,
    pub pools: Vec<PoolUsage>,
}

const INODE_FIELDS: &[(&str, FieldSetter<InodeUsage>)] = &[
    ("usedInodes", |r, v| {
        r.used = parse_float("usedInodes", v)?;
        Ok(())
    }),
    ("freeInodes", |r, v| {
        r.free = parse_float("freeInodes", v)?;
        Ok(())
    }),
    ("allocatedInodes", |r, v| {
        r.allocated = parse_float("allocatedInodes", v)?;
        Ok(())
    }),
    ("maxInodes", |r, v| {
        r.max = parse_float("maxInodes", v)?;
        Ok(())
    }),
];

const FS_TOTAL_FIELDS: &[(&str, FieldSetter<BlockUsage>)] = &[
    ("fsSize", |r, v| {
        r.size_bytes = parse_kb("fsSize", v)?;
        Ok(())
    }),
    ("freeBlocks", |r, v| {
        r.free_bytes = parse_kb("freeBlocks", v)?;
        Ok(())
    }),
    ("freeBlocksPct", |r, v| {
        r.free_percent = parse_float("freeBlocksPct", v)?;
        Ok(())
    }),
];

const METADATA_FIELDS: &[(&str, FieldSetter<BlockUsage>)] = &[
    ("totalMetadata", |r, v| {
        r.size_bytes = parse_kb("totalMetadata", v)?;
        Ok(())
    }),
    ("freeBlocks", |r, v| {
        r.free_bytes = parse_kb("freeBlocks", v)?;
        Ok(())
    }),
    ("freeBlocksPct", |r, v| {
        r.free_percent = parse_float("freeBlocksPct", v)?;
        Ok(())
    }),
];

const POOL_FIELDS: &[(&str, FieldSetter<PoolUsage>)] = &[
    ("poolName", |r, v| {
        r.name = v.to_string();
        Ok(())
    }),
    ("poolSize", |r, v| {
        r.total_bytes = parse_kb("poolSize", v)?;
        Ok(())
    }),
    ("freeBlocks", |r, v| {
        r.free_bytes = parse_kb("freeBlocks", v)?;
        Ok(())
    }),
    ("freeFragments", |r, v| {
        r.free_fragments_bytes = parse_kb("freeFragments", v)?;
        Ok(())
    }),
    ("maxDiskSize", |r, v| {
        r.max_disk_size_bytes = parse_kb("maxDiskSize", v)?;
        Ok(())
    }),
];

/// Parses one mmdf invocation's output into [`FsUsage`].
pub fn parse_mmdf(output: &str) -> Result<FsUsage, CollectError> {
    Ok(FsUsage {
        inode: parse_section(output, "mmdf", "inode", INODE_FIELDS)?
            .into_iter()
            .next(),
        total: parse_section(output, "mmdf", "fsTotal", FS_TOTAL_FIELDS)?
            .into_iter()
            .next(),
        metadata: parse_section(output, "mmdf", "metadata", METADATA_FIELDS)?
            .into_iter()
            .next(),
        pools: parse_section(output, "mmdf", "poolTotal", POOL_FIELDS)?,
    })
}

struct MmdfMetrics {
    used_inodes: GaugeVec,
    free_inodes: GaugeVec,
    allocated_inodes: GaugeVec,
    inodes: GaugeVec,
    size_bytes: GaugeVec,
    free_bytes: GaugeVec,
    free_percent: GaugeVec,
    metadata_size_bytes: GaugeVec,
    metadata_free_bytes: GaugeVec,
    metadata_free_percent: GaugeVec,
    pool_total_bytes: GaugeVec,
    pool_free_bytes: GaugeVec,
    pool_free_fragments_bytes: GaugeVec,
    pool_max_disk_size_bytes: GaugeVec,
}

impl MmdfMetrics {
    fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let fs_gauge = |name: &str, help: &str| {
            GaugeVec::new(
                Opts::new(name, help).namespace(NAMESPACE).subsystem("fs"),
                &["fs"],
            )
        };
        let pool_gauge = |name: &str, help: &str| {
            GaugeVec::new(
                Opts::new(name, help).namespace(NAMESPACE).subsystem("fs"),
                &["fs", "pool"],
            )
        };

        let metrics = Self {
            used_inodes: fs_gauge("used_inodes", "Used inodes")?,
            free_inodes: fs_gauge("free_inodes", "Free inodes")?,
            allocated_inodes: fs_gauge("allocated_inodes", "Allocated inodes")?,
            inodes: fs_gauge("inodes", "Maximum inodes")?,
            size_bytes: fs_gauge("size_bytes", "Filesystem size in bytes")?,
            free_bytes: fs_gauge("free_bytes", "Filesystem free bytes")?,
            free_percent: fs_gauge("free_percent", "Filesystem free percent")?,
            metadata_size_bytes: fs_gauge("metadata_size_bytes", "Metadata size in bytes")?,
            metadata_free_bytes: fs_gauge("metadata_free_bytes", "Metadata free bytes")?,
            metadata_free_percent: fs_gauge("metadata_free_percent", "Metadata free percent")?,
            pool_total_bytes: pool_gauge("pool_total_bytes", "Pool total size in bytes")?,
            pool_free_bytes: pool_gauge("pool_free_bytes", "Pool free bytes")?,
            pool_free_fragments_bytes: pool_gauge(
                "pool_free_fragments_bytes",
                "Pool free fragments in bytes",
            )?,
            pool_max_disk_size_bytes: pool_gauge(
                "pool_max_disk_size_bytes",
                "Pool maximum disk size in bytes",
            )?,
        };

        registry.register(Box::new(metrics.used_inodes.clone()))?;
        registry.register(Box::new(metrics.free_inodes.clone()))?;
        registry.register(Box::new(metrics.allocated_inodes.clone()))?;
        registry.register(Box::new(metrics.inodes.clone()))?;
        registry.register(Box::new(metrics.size_bytes.clone()))?;
        registry.register(Box::new(metrics.free_bytes.clone()))?;
        registry.register(Box::new(metrics.free_percent.clone()))?;
        registry.register(Box::new(metrics.metadata_size_bytes.clone()))?;
        registry.register(Box::new(metrics.metadata_free_bytes.clone()))?;
        registry.register(Box::new(metrics.metadata_free_percent.clone()))?;
        registry.register(Box::new(metrics.pool_total_bytes.clone()))?;
        registry.register(Box::new(metrics.pool_free_bytes.clone()))?;
        registry.register(Box::new(metrics.pool_free_fragments_bytes.clone()))?;
        registry.register(Box::new(metrics.pool_max_disk_size_bytes.clone()))?;
        Ok(metrics)
    }

    fn emit(&self, fs: &str, usage: &FsUsage) {
        if let Some(inode) = &usage.inode {
            self.used_inodes.with_label_values(&[fs]).set(inode.used);
            self.free_inodes.with_label_values(&[fs]).set(inode.free);
            self.allocated_inodes
                .with_label_values(&[fs])
                .set(inode.allocated);
            self.inodes.with_label_values(&[fs]).set(inode.max);
        }
        if let Some(total) = &usage.total {
            self.size_bytes.with_label_values(&[fs]).set(total.size_bytes);
            self.free_bytes.with_label_values(&[fs]).set(total.free_bytes);
            self.free_percent
                .with_label_values(&[fs])
                .set(total.free_percent);
        }
        if let Some(metadata) = &usage.metadata {
            self.metadata_size_bytes
                .with_label_values(&[fs])
                .set(metadata.size_bytes);
            self.metadata_free_bytes
                .with_label_values(&[fs])
                .set(metadata.free_bytes);
            self.metadata_free_percent
                .with_label_values(&[fs])
                .set(metadata.free_percent);
        }
        for pool in &usage.pools {
            self.pool_total_bytes
                .with_label_values(&[fs, &pool.name])
                .set(pool.total_bytes);
            self.pool_free_bytes
                .with_label_values(&[fs, &pool.name])
                .set(pool.free_bytes);
            self.pool_free_fragments_bytes
                .with_label_values(&[fs, &pool.name])
                .set(pool.free_fragments_bytes);
            self.pool_max_disk_size_bytes
                .with_label_values(&[fs, &pool.name])
                .set(pool.max_disk_size_bytes);
        }
    }
}

pub struct MmdfCollector {
    timeout: Duration,
    mmlsfs_timeout: Duration,
    filesystems: Option<Vec<String>>,
    cache: LastGoodMap<FsUsage>,
}

impl MmdfCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.mmdf_timeout,
            mmlsfs_timeout: config.mmlsfs_timeout,
            filesystems: config.mmdf_filesystems.clone(),
            cache: LastGoodMap::new(),
        }
    }

    async fn scrape_fs(&self, scrape: &Scrape, fs: &str) -> Result<FsUsage, CollectError> {
        let output = scrape
            .runner
            .run(MMDF, &[fs, "-Y"], None, self.timeout)
            .await?;
        parse_mmdf(&String::from_utf8_lossy(&output))
    }

    async fn collect_fs(&self, scrape: &Scrape, metrics: &MmdfMetrics, fs: &str) {
        let started = Instant::now();
        let label = format!("mmdf-{}", fs);
        match self.scrape_fs(scrape, fs).await {
            Ok(usage) => {
                if scrape.use_cache {
                    self.cache.store(fs, &usage);
                }
                metrics.emit(fs, &usage);
                scrape.metrics.report(&label, started, None);
            }
            Err(e) => {
                error!("mmdf collection for {} failed: {}", fs, e);
                if scrape.use_cache {
                    if let Some(usage) = self.cache.get(fs) {
                        metrics.emit(fs, &usage);
                    }
                }
                scrape.metrics.report(&label, started, Some(&e));
            }
        }
    }
}

#[async_trait]
impl Collector for MmdfCollector {
    fn name(&self) -> &'static str {
        "mmdf"
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

        let metrics = MmdfMetrics::register(scrape.registry())?;
        join_all(
            filesystems
                .iter()
                .map(|fs| self.collect_fs(scrape, &metrics, fs)),
        )
        .await;
        Ok(())
    }
}
