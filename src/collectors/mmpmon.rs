//! I/O counter collector. Pipes `fs_io_s` into `mmpmon -s -p` and parses
//! its whitespace-delimited key/value output into monotonic counters.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use prometheus::{CounterVec, GaugeVec, Opts, Registry};
use tracing::error;

use super::{CollectError, Collector, Scrape, NAMESPACE};
use crate::cache::LastGood;
use crate::config::Config;
use crate::parser::ParseError;

const MMPMON: &str = "/usr/lpp/mmfs/bin/mmpmon";

/// One `fs_io_s` response row (one per filesystem).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerfRecord {
    pub fs: String,
    pub nodename: String,
    pub read_bytes: f64,
    pub write_bytes: f64,
    pub opens: f64,
    pub closes: f64,
    pub reads: f64,
    pub writes: f64,
    pub read_dir: f64,
    pub inode_updates: f64,
}

/// Parses the mmpmon key/value format: tokens after the `_fs_io_s_` marker
/// alternate between `_key_` and value.
pub fn parse_perf(output: &str) -> Result<Vec<PerfRecord>, ParseError> {
    let mut records = Vec::new();
    for line in output.lines() {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some("_fs_io_s_") {
            continue;
        }
        let mut pairs: HashMap<&str, &str> = HashMap::new();
        while let (Some(key), Some(value)) = (tokens.next(), tokens.next()) {
            pairs.insert(key, value);
        }
        let Some(fs) = pairs.get("_fs_") else {
            continue;
        };

        let number = |key: &str| -> Result<f64, ParseError> {
            match pairs.get(key) {
                Some(value) => value.parse().map_err(|_| ParseError::InvalidNumber {
                    field: key.to_string(),
                    value: value.to_string(),
                }),
                None => Ok(0.0),
            }
        };

        records.push(PerfRecord {
            fs: fs.to_string(),
            nodename: pairs.get("_nn_").unwrap_or(&"").to_string(),
            read_bytes: number("_br_")?,
            write_bytes: number("_bw_")?,
            opens: number("_oc_")?,
            closes: number("_cc_")?,
            reads: number("_rdc_")?,
            writes: number("_wc_")?,
            read_dir: number("_dir_")?,
            inode_updates: number("_iu_")?,
        });
    }
    Ok(records)
}

pub struct MmpmonCollector {
    timeout: Duration,
    cache: LastGood<Vec<PerfRecord>>,
}

impl MmpmonCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.mmpmon_timeout,
            cache: LastGood::new(),
        }
    }

    async fn scrape(&self, scrape: &Scrape) -> Result<Vec<PerfRecord>, CollectError> {
        let output = scrape
            .runner
            .run(MMPMON, &["-s", "-p"], Some("fs_io_s\n"), self.timeout)
            .await?;
        let text = String::from_utf8_lossy(&output);
        Ok(parse_perf(&text)?)
    }

    fn emit(&self, registry: &Registry, records: &[PerfRecord]) -> Result<(), prometheus::Error> {
        let read_bytes = CounterVec::new(
            Opts::new("read_bytes_total", "Total bytes read per filesystem")
                .namespace(NAMESPACE)
                .subsystem("perf"),
            &["fs", "nodename"],
        )?;
        let write_bytes = CounterVec::new(
            Opts::new("write_bytes_total", "Total bytes written per filesystem")
                .namespace(NAMESPACE)
                .subsystem("perf"),
            &["fs", "nodename"],
        )?;
        let operations = CounterVec::new(
            Opts::new("operations_total", "Total operations per filesystem")
                .namespace(NAMESPACE)
                .subsystem("perf"),
            &["fs", "nodename", "operation"],
        )?;
        let info = GaugeVec::new(
            Opts::new("info", "Node responding to mmpmon")
                .namespace(NAMESPACE)
                .subsystem("perf"),
            &["fs", "nodename"],
        )?;
        registry.register(Box::new(read_bytes.clone()))?;
        registry.register(Box::new(write_bytes.clone()))?;
        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(info.clone()))?;

        for record in records {
            let fs = record.fs.as_str();
            let node = record.nodename.as_str();
            read_bytes
                .with_label_values(&[fs, node])
                .inc_by(record.read_bytes);
            write_bytes
                .with_label_values(&[fs, node])
                .inc_by(record.write_bytes);
            let ops: &[(&str, f64)] = &[
                ("opens", record.opens),
                ("closes", record.closes),
                ("reads", record.reads),
                ("writes", record.writes),
                ("read_dir", record.read_dir),
                ("inode_updates", record.inode_updates),
            ];
            for (operation, value) in ops {
                operations
                    .with_label_values(&[fs, node, operation])
                    .inc_by(*value);
            }
            info.with_label_values(&[fs, node]).set(1.0);
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for MmpmonCollector {
    fn name(&self) -> &'static str {
        "mmpmon"
    }

    async fn collect(&self, scrape: &Scrape) -> Result<(), prometheus::Error> {
        let started = Instant::now();
        match self.scrape(scrape).await {
            Ok(records) => {
                if scrape.use_cache {
                    self.cache.store(&records);
                }
                self.emit(scrape.registry(), &records)?;
                scrape.metrics.report(self.name(), started, None);
            }
            Err(e) => {
                error!("mmpmon collector failed: {}", e);
                if scrape.use_cache {
                    if let Some(records) = self.cache.get() {
                        self.emit(scrape.registry(), &records)?;
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

    const OUTPUT: &str = "\
_fs_io_s_ _n_ 10.22.0.172 _nn_ ib-node01 _rc_ 0 _t_ 1579358234 _tu_ 53212 _cl_ cluster.domain _fs_ scratch _d_ 48 _br_ 205607400434 _bw_ 74839282351 _oc_ 2377656 _cc_ 2201576 _rdc_ 59420404 _wc_ 18874626 _dir_ 40971 _iu_ 544768
_fs_io_s_ _n_ 10.22.0.172 _nn_ ib-node01 _rc_ 0 _t_ 1579358234 _tu_ 53212 _cl_ cluster.domain _fs_ project _d_ 96 _br_ 0 _bw_ 205607400434 _oc_ 513 _cc_ 513 _rdc_ 0 _wc_ 1 _dir_ 0 _iu_ 169
";

    #[test]
    fn test_parse_perf() {
        let records = parse_perf(OUTPUT).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fs, "scratch");
        assert_eq!(records[0].nodename, "ib-node01");
        assert_eq!(records[0].read_bytes, 205607400434.0);
        assert_eq!(records[1].write_bytes, 205607400434.0);
        assert_eq!(records[1].inode_updates, 169.0);
    }

    #[test]
    fn test_parse_perf_skips_unrelated_lines() {
        let records = parse_perf("mmpmon node 10.22.0.172 fs_io_s OK\n").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_perf_invalid_counter_fails() {
        let err = parse_perf("_fs_io_s_ _fs_ scratch _br_ banana\n").unwrap_err();
        assert!(matches!(err, ParseError::InvalidNumber { .. }));
    }

    #[tokio::test]
    async fn test_collect_counters() {
        let runner = MockRunner::new().with_output("/usr/lpp/mmfs/bin/mmpmon -s -p", OUTPUT);
        let scrape = Scrape::new(Arc::new(runner), false).unwrap();
        let collector = MmpmonCollector::new(&Config::default());
        collector.collect(&scrape).await.unwrap();
        let registry = scrape.into_registry();

        assert_eq!(
            sample_value(
                &registry,
                "gpfs_perf_read_bytes_total",
                &[("fs", "scratch"), ("nodename", "ib-node01")]
            ),
            Some(205607400434.0)
        );
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_perf_operations_total",
                &[("fs", "scratch"), ("operation", "reads")]
            ),
            Some(59420404.0)
        );
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_perf_operations_total",
                &[("fs", "project"), ("operation", "inode_updates")]
            ),
            Some(169.0)
        );
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_exporter_collect_error",
                &[("collector", "mmpmon")]
            ),
            Some(0.0)
        );
    }
}
