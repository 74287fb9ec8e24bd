//! Quota report collector (`mmrepquota <kind> -Y`).
//!
//! One invocation per configured quota kind (user, group, fileset), each
//! reported under its own metric subsystem with the principal as the label,
//! e.g. `gpfs_fileset_used_bytes{fs="project",fileset="apps"}`. A failing
//! kind flags both its own `mmrepquota-<kind>` self-metrics and the
//! aggregate `mmrepquota` label while the other kinds still emit.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use prometheus::{GaugeVec, Opts, Registry};
use tracing::error;

use super::{CollectError, Collector, Scrape, NAMESPACE};
use crate::cache::LastGoodMap;
use crate::config::{Config, QuotaKind};
use crate::parser::{parse_float, parse_kb, parse_section, FieldSetter};

const MMREPQUOTA: &str = "/usr/lpp/mmfs/bin/mmrepquota";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuotaEntry {
    pub filesystem: String,
    pub name: String,
    pub used_bytes: f64,
    pub quota_bytes: f64,
    pub limit_bytes: f64,
    pub in_doubt_bytes: f64,
    pub used_files: f64,
    pub quota_files: f64,
    pub limit_files: f64,
    pub in_doubt_files: f64,
}

const QUOTA_FIELDS: &[(&str, FieldSetter<QuotaEntry>)] = &[
    ("filesystemName", |r, v| {
        r.filesystem = v.to_string();
        Ok(())
    }),
    ("name", |r, v| {
        r.name = v.to_string();
        Ok(())
    }),
    ("blockUsage", |r, v| {
        r.used_bytes = parse_kb("blockUsage", v)?;
        Ok(())
    }),
    ("blockQuota", |r, v| {
        r.quota_bytes = parse_kb("blockQuota", v)?;
        Ok(())
    }),
    ("blockLimit", |r, v| {
        r.limit_bytes = parse_kb("blockLimit", v)?;
        Ok(())
    }),
    ("blockInDoubt", |r, v| {
        r.in_doubt_bytes = parse_kb("blockInDoubt", v)?;
        Ok(())
    }),
    ("filesUsage", |r, v| {
        r.used_files = parse_float("filesUsage", v)?;
        Ok(())
    }),
    ("filesQuota", |r, v| {
        r.quota_files = parse_float("filesQuota", v)?;
        Ok(())
    }),
    ("filesLimit", |r, v| {
        r.limit_files = parse_float("filesLimit", v)?;
        Ok(())
    }),
    ("filesInDoubt", |r, v| {
        r.in_doubt_files = parse_float("filesInDoubt", v)?;
        Ok(())
    }),
];

struct QuotaMetrics {
    used_bytes: GaugeVec,
    quota_bytes: GaugeVec,
    limit_bytes: GaugeVec,
    in_doubt_bytes: GaugeVec,
    used_files: GaugeVec,
    quota_files: GaugeVec,
    limit_files: GaugeVec,
    in_doubt_files: GaugeVec,
}

impl QuotaMetrics {
    fn register(registry: &Registry, kind: QuotaKind) -> Result<Self, prometheus::Error> {
        let labels = ["fs", kind.label()];
        let gauge = |name: &str, help: &str| {
            GaugeVec::new(
                Opts::new(name, help)
                    .namespace(NAMESPACE)
                    .subsystem(kind.label()),
                &labels,
            )
        };
        let metrics = Self {
            used_bytes: gauge("used_bytes", "Quota block usage in bytes")?,
            quota_bytes: gauge("quota_bytes", "Quota soft block limit in bytes")?,
            limit_bytes: gauge("limit_bytes", "Quota hard block limit in bytes")?,
            in_doubt_bytes: gauge("in_doubt_bytes", "Quota block usage in doubt in bytes")?,
            used_files: gauge("used_files", "Quota file usage")?,
            quota_files: gauge("quota_files", "Quota soft file limit")?,
            limit_files: gauge("limit_files", "Quota hard file limit")?,
            in_doubt_files: gauge("in_doubt_files", "Quota file usage in doubt")?,
        };
        registry.register(Box::new(metrics.used_bytes.clone()))?;
        registry.register(Box::new(metrics.quota_bytes.clone()))?;
        registry.register(Box::new(metrics.limit_bytes.clone()))?;
        registry.register(Box::new(metrics.in_doubt_bytes.clone()))?;
        registry.register(Box::new(metrics.used_files.clone()))?;
        registry.register(Box::new(metrics.quota_files.clone()))?;
        registry.register(Box::new(metrics.limit_files.clone()))?;
        registry.register(Box::new(metrics.in_doubt_files.clone()))?;
        Ok(metrics)
    }

    fn emit(&self, entries: &[QuotaEntry]) {
        for entry in entries {
            let labels = [entry.filesystem.as_str(), entry.name.as_str()];
            self.used_bytes.with_label_values(&labels).set(entry.used_bytes);
            self.quota_bytes.with_label_values(&labels).set(entry.quota_bytes);
            self.limit_bytes.with_label_values(&labels).set(entry.limit_bytes);
            self.in_doubt_bytes
                .with_label_values(&labels)
                .set(entry.in_doubt_bytes);
            self.used_files.with_label_values(&labels).set(entry.used_files);
            self.quota_files.with_label_values(&labels).set(entry.quota_files);
            self.limit_files.with_label_values(&labels).set(entry.limit_files);
            self.in_doubt_files
                .with_label_values(&labels)
                .set(entry.in_doubt_files);
        }
    }
}

pub struct MmrepquotaCollector {
    timeout: Duration,
    filesystems: Option<Vec<String>>,
    kinds: Vec<QuotaKind>,
    cache: LastGoodMap<Vec<QuotaEntry>>,
}

impl MmrepquotaCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.mmrepquota_timeout,
            filesystems: config.mmrepquota_filesystems.clone(),
            kinds: config.mmrepquota_quota_kinds.clone(),
            cache: LastGoodMap::new(),
        }
    }

    async fn scrape_kind(
        &self,
        scrape: &Scrape,
        kind: QuotaKind,
    ) -> Result<Vec<QuotaEntry>, CollectError> {
        let mut args = vec![kind.flag(), "-Y"];
        match &self.filesystems {
            Some(filesystems) => args.extend(filesystems.iter().map(String::as_str)),
            None => args.push("-a"),
        }
        let output = scrape.runner.run(MMREPQUOTA, &args, None, self.timeout).await?;
        let text = String::from_utf8_lossy(&output);
        Ok(parse_section(&text, "mmrepquota", "", QUOTA_FIELDS)?)
    }

    async fn collect_kind(
        &self,
        scrape: &Scrape,
        kind: QuotaKind,
    ) -> Result<Option<CollectError>, prometheus::Error> {
        let metrics = QuotaMetrics::register(scrape.registry(), kind)?;
        let started = Instant::now();
        let label = format!("mmrepquota-{}", kind.label());
        match self.scrape_kind(scrape, kind).await {
            Ok(entries) => {
                if scrape.use_cache {
                    self.cache.store(kind.label(), &entries);
                }
                metrics.emit(&entries);
                scrape.metrics.report(&label, started, None);
                Ok(None)
            }
            Err(e) => {
                error!("mmrepquota {} collection failed: {}", kind.label(), e);
                if scrape.use_cache {
                    if let Some(entries) = self.cache.get(kind.label()) {
                        metrics.emit(&entries);
                    }
                }
                scrape.metrics.report(&label, started, Some(&e));
                Ok(Some(e))
            }
        }
    }
}

#[async_trait]
impl Collector for MmrepquotaCollector {
    fn name(&self) -> &'static str {
        "mmrepquota"
    }

    async fn collect(&self, scrape: &Scrape) -> Result<(), prometheus::Error> {
        let started = Instant::now();
        let results = join_all(
            self.kinds
                .iter()
                .map(|kind| self.collect_kind(scrape, *kind)),
        )
        .await;
        // The aggregate label fails when any kind failed; the per-kind
        // labels say which one.
        let mut first_error = None;
        for result in results {
            if let Some(e) = result? {
                first_error.get_or_insert(e);
            }
        }
        scrape
            .metrics
            .report(self.name(), started, first_error.as_ref());
        Ok(())
    }
}
