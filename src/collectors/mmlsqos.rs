//! QoS statistics collector (`mmlsqos <fs> -Y`).
//!
//! The `stats` section carries one row per (pool, class, epoch); rows are in
//! epoch order so the newest measurement for a pool/class pair wins. Idle
//! classes report their rates as the literal `nan`, which the numeric parser
//! maps to zero.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use prometheus::{GaugeVec, Opts, Registry};
use tracing::error;

use super::{resolve_filesystems, CollectError, Collector, Scrape, NAMESPACE};
use crate::cache::LastGoodMap;
use crate::config::Config;
use crate::parser::{parse_float, parse_section, FieldSetter};

const MMLSQOS: &str = "/usr/lpp/mmfs/bin/mmlsqos";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QosStat {
    pub pool: String,
    pub class: String,
    pub iops: f64,
    pub average_queued_ios: f64,
    pub average_queue_seconds: f64,
    pub measurement_period_seconds: f64,
}

const QOS_FIELDS: &[(&str, FieldSetter<QosStat>)] = &[
    ("pool", |r, v| {
        r.pool = v.to_string();
        Ok(())
    }),
    ("class", |r, v| {
        r.class = v.to_string();
        Ok(())
    }),
    ("iops", |r, v| {
        r.iops = parse_float("iops", v)?;
        Ok(())
    }),
    ("ioql", |r, v| {
        r.average_queued_ios = parse_float("ioql", v)?;
        Ok(())
    }),
    ("qsdl", |r, v| {
        r.average_queue_seconds = parse_float("qsdl", v)?;
        Ok(())
    }),
    ("et", |r, v| {
        r.measurement_period_seconds = parse_float("et", v)?;
        Ok(())
    }),
];

struct QosMetrics {
    iops: GaugeVec,
    queued_ios: GaugeVec,
    queue_seconds: GaugeVec,
    period_seconds: GaugeVec,
}

impl QosMetrics {
    fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let gauge = |name: &str, help: &str| {
            GaugeVec::new(
                Opts::new(name, help).namespace(NAMESPACE).subsystem("qos"),
                &["fs", "pool", "class"],
            )
        };
        let metrics = Self {
            iops: gauge("iops", "QoS I/O operations per second")?,
            queued_ios: gauge("average_queued_ios", "Average number of queued I/O requests")?,
            queue_seconds: gauge("average_queue_seconds", "Average queue delay in seconds")?,
            period_seconds: gauge(
                "measurement_period_seconds",
                "Length of the QoS measurement period",
            )?,
        };
        registry.register(Box::new(metrics.iops.clone()))?;
        registry.register(Box::new(metrics.queued_ios.clone()))?;
        registry.register(Box::new(metrics.queue_seconds.clone()))?;
        registry.register(Box::new(metrics.period_seconds.clone()))?;
        Ok(metrics)
    }

    fn emit(&self, fs: &str, stats: &[QosStat]) {
        for stat in stats {
            let labels = [fs, stat.pool.as_str(), stat.class.as_str()];
            self.iops.with_label_values(&labels).set(stat.iops);
            self.queued_ios
                .with_label_values(&labels)
                .set(stat.average_queued_ios);
            self.queue_seconds
                .with_label_values(&labels)
                .set(stat.average_queue_seconds);
            self.period_seconds
                .with_label_values(&labels)
                .set(stat.measurement_period_seconds);
        }
    }
}

pub struct MmlsqosCollector {
    timeout: Duration,
    mmlsfs_timeout: Duration,
    filesystems: Option<Vec<String>>,
    cache: LastGoodMap<Vec<QosStat>>,
}

impl MmlsqosCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.mmlsqos_timeout,
            mmlsfs_timeout: config.mmlsfs_timeout,
            filesystems: config.mmlsqos_filesystems.clone(),
            cache: LastGoodMap::new(),
        }
    }

    async fn scrape_fs(&self, scrape: &Scrape, fs: &str) -> Result<Vec<QosStat>, CollectError> {
        let output = scrape
            .runner
            .run(MMLSQOS, &[fs, "-Y", "--seconds", "60"], None, self.timeout)
            .await?;
        let text = String::from_utf8_lossy(&output);
        Ok(parse_section(&text, "mmlsqos", "stats", QOS_FIELDS)?)
    }

    async fn collect_fs(&self, scrape: &Scrape, metrics: &QosMetrics, fs: &str) {
        let started = Instant::now();
        let label = format!("mmlsqos-{}", fs);
        match self.scrape_fs(scrape, fs).await {
            Ok(stats) => {
                if scrape.use_cache {
                    self.cache.store(fs, &stats);
                }
                metrics.emit(fs, &stats);
                scrape.metrics.report(&label, started, None);
            }
            Err(e) => {
                error!("mmlsqos collection for {} failed: {}", fs, e);
                if scrape.use_cache {
                    if let Some(stats) = self.cache.get(fs) {
                        metrics.emit(fs, &stats);
                    }
                }
                scrape.metrics.report(&label, started, Some(&e));
            }
        }
    }
}

#[async_trait]
impl Collector for MmlsqosCollector {
    fn name(&self) -> &'static str {
        "mmlsqos"
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

        let metrics = QosMetrics::register(scrape.registry())?;
        join_all(
            filesystems
                .iter()
                .map(|fs| self.collect_fs(scrape, &metrics, fs)),
        )
        .await;
        Ok(())
    }
}
