//! Mount presence collector.
//!
//! Reads the mount table instead of running an mm* command. Without an
//! explicit mount list every mounted gpfs filesystem is reported as present;
//! with a list, each named mount point is reported as 1 or 0 depending on
//! whether it is currently mounted with the gpfs filesystem type. The list
//! form is what catches a filesystem that silently fell off a node.

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use prometheus::{GaugeVec, Opts, Registry};
use tracing::error;

use super::{CollectError, Collector, Scrape, NAMESPACE};
use crate::config::Config;

const GPFS_FSTYPE: &str = "gpfs";

pub struct MountCollector {
    mounts: Option<Vec<String>>,
    proc_mounts: PathBuf,
}

/// Extracts the mount points carrying the gpfs filesystem type from
/// /proc/mounts-formatted text.
pub fn parse_gpfs_mounts(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let mount_point = fields.next()?;
            let fstype = fields.next()?;
            if fstype == GPFS_FSTYPE {
                Some(mount_point.to_string())
            } else {
                None
            }
        })
        .collect()
}

impl MountCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            mounts: config.mount_mounts.clone(),
            proc_mounts: PathBuf::from("/proc/mounts"),
        }
    }

    #[cfg(test)]
    fn with_proc_mounts(mut self, path: impl Into<PathBuf>) -> Self {
        self.proc_mounts = path.into();
        self
    }

    async fn scrape(&self) -> Result<Vec<String>, CollectError> {
        let text = tokio::fs::read_to_string(&self.proc_mounts).await?;
        Ok(parse_gpfs_mounts(&text))
    }

    fn emit(&self, registry: &Registry, mounted: &[String]) -> Result<(), prometheus::Error> {
        let status = GaugeVec::new(
            Opts::new("status", "Mount point is mounted with the gpfs filesystem type")
                .namespace(NAMESPACE)
                .subsystem("mount"),
            &["mount"],
        )?;
        registry.register(Box::new(status.clone()))?;

        match &self.mounts {
            Some(expected) => {
                for mount in expected {
                    let up = mounted.iter().any(|m| m == mount);
                    status
                        .with_label_values(&[mount])
                        .set(if up { 1.0 } else { 0.0 });
                }
            }
            None => {
                for mount in mounted {
                    status.with_label_values(&[mount]).set(1.0);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for MountCollector {
    fn name(&self) -> &'static str {
        "mount"
    }

    async fn collect(&self, scrape: &Scrape) -> Result<(), prometheus::Error> {
        let started = Instant::now();
        match self.scrape().await {
            Ok(mounted) => {
                self.emit(scrape.registry(), &mounted)?;
                scrape.metrics.report(self.name(), started, None);
            }
            Err(e) => {
                error!("mount collector failed: {}", e);
                scrape.metrics.report(self.name(), started, Some(&e));
            }
        }
        Ok(())
    }
}
