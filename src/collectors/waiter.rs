//! Waiter collector (`mmdiag --waiters -Y`).
//!
//! Long waiters are the canonical sign of a struggling cluster. The wait
//! times of all non-excluded waiter threads go into a histogram with
//! operator-chosen buckets, and a per-thread-name count makes the noisy
//! threads identifiable without a label per waiter instance.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use prometheus::{GaugeVec, Histogram, HistogramOpts, Opts, Registry};
use regex::Regex;
use tracing::{error, info};

use super::{CollectError, Collector, Scrape, NAMESPACE};
use crate::cache::LastGood;
use crate::config::Config;
use crate::parser::{parse_float, parse_section, FieldSetter};

const MMDIAG: &str = "/usr/lpp/mmfs/bin/mmdiag";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Waiter {
    pub thread_name: String,
    pub seconds: f64,
    pub reason: String,
}

const WAITER_FIELDS: &[(&str, FieldSetter<Waiter>)] = &[
    ("threadName", |r, v| {
        r.thread_name = v.to_string();
        Ok(())
    }),
    ("waitTime", |r, v| {
        r.seconds = parse_float("waitTime", v)?;
        Ok(())
    }),
    ("auxReason", |r, v| {
        r.reason = urlencoding::decode(v)
            .map(|d| d.into_owned())
            .unwrap_or_else(|_| v.to_string());
        Ok(())
    }),
];

pub struct WaiterCollector {
    timeout: Duration,
    threshold: f64,
    exclude: Regex,
    buckets: Vec<f64>,
    log_reason: bool,
    cache: LastGood<Vec<Waiter>>,
}

impl WaiterCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.mmdiag_timeout,
            threshold: config.waiter_threshold,
            exclude: config.waiter_exclude.clone(),
            buckets: config.waiter_buckets.clone(),
            log_reason: config.waiter_log_reason,
            cache: LastGood::new(),
        }
    }

    async fn scrape(&self, scrape: &Scrape) -> Result<Vec<Waiter>, CollectError> {
        let output = scrape
            .runner
            .run(MMDIAG, &["--waiters", "-Y"], None, self.timeout)
            .await?;
        let text = String::from_utf8_lossy(&output);
        let waiters = parse_section(&text, "mmdiag", "waiters", WAITER_FIELDS)?
            .into_iter()
            .filter(|w: &Waiter| w.seconds >= self.threshold && !self.exclude.is_match(&w.thread_name))
            .collect();
        Ok(waiters)
    }

    fn emit(&self, registry: &Registry, waiters: &[Waiter]) -> Result<(), prometheus::Error> {
        let seconds = Histogram::with_opts(
            HistogramOpts::new("waiter_seconds", "Wait time of currently active waiters")
                .namespace(NAMESPACE)
                .subsystem("mmdiag")
                .buckets(self.buckets.clone()),
        )?;
        let info_count = GaugeVec::new(
            Opts::new("waiter_info_count", "Number of active waiters per thread name")
                .namespace(NAMESPACE)
                .subsystem("mmdiag"),
            &["waiter"],
        )?;
        registry.register(Box::new(seconds.clone()))?;
        registry.register(Box::new(info_count.clone()))?;

        let mut per_thread: HashMap<&str, f64> = HashMap::new();
        for waiter in waiters {
            seconds.observe(waiter.seconds);
            *per_thread.entry(waiter.thread_name.as_str()).or_insert(0.0) += 1.0;
            if self.log_reason {
                info!(
                    "waiter {} for {}s: {}",
                    waiter.thread_name, waiter.seconds, waiter.reason
                );
            }
        }
        for (thread, count) in per_thread {
            info_count.with_label_values(&[thread]).set(count);
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for WaiterCollector {
    fn name(&self) -> &'static str {
        "mmdiag"
    }

    async fn collect(&self, scrape: &Scrape) -> Result<(), prometheus::Error> {
        let started = Instant::now();
        match self.scrape(scrape).await {
            Ok(waiters) => {
                if scrape.use_cache {
                    self.cache.store(&waiters);
                }
                self.emit(scrape.registry(), &waiters)?;
                scrape.metrics.report(self.name(), started, None);
            }
            Err(e) => {
                error!("mmdiag waiter collector failed: {}", e);
                if scrape.use_cache {
                    if let Some(waiters) = self.cache.get() {
                        self.emit(scrape.registry(), &waiters)?;
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
    use crate::config::parse_buckets;
    use crate::runner::MockRunner;
    use crate::testutil::{histogram_buckets, sample_value};
    use std::sync::Arc;

    const OUTPUT: &str = "\
mmdiag:waiters:HEADER:version:reserved:reserved:threadId:threadAddr:threadName:waitStartTime:waitTime:isMonitored:condVarAddr:condVarName:condVarReason:mutexAddr:mutexName:auxReason:delayTime:delayReason:
mmdiag:waiters:0:1:::1024:0000000000000000:RebuildWorkThread:Fri Jan 10 2020:0.5:monitored:::::::data%20write:::
mmdiag:waiters:0:1:::1025:0000000000000000:RebuildWorkThread:Fri Jan 10 2020:3.0:monitored:::::::data%20write:::
mmdiag:waiters:0:1:::1026:0000000000000000:SGExceptionLogBufferFullThread:Fri Jan 10 2020:30.0:monitored:::::::log%20wrap:::
mmdiag:waiters:0:1:::1027:0000000000000000:MMFSADMDummyThread:Fri Jan 10 2020:900.0:monitored:::::::idle:::
";

    fn collector(buckets: &str) -> WaiterCollector {
        let mut collector = WaiterCollector::new(&Config::default());
        collector.buckets = parse_buckets(buckets).unwrap();
        collector
    }

    async fn run(collector: &WaiterCollector, runner: MockRunner) -> prometheus::Registry {
        let scrape = Scrape::new(Arc::new(runner), false).unwrap();
        collector.collect(&scrape).await.unwrap();
        scrape.into_registry()
    }

    #[tokio::test]
    async fn test_histogram_buckets() {
        let runner = MockRunner::new().with_output("/usr/lpp/mmfs/bin/mmdiag --waiters -Y", OUTPUT);
        let registry = run(&collector("1s,5s,60m"), runner).await;

        // The excluded dummy thread does not count.
        let (count, buckets) =
            histogram_buckets(&registry, "gpfs_mmdiag_waiter_seconds", &[]).unwrap();
        assert_eq!(count, 3);
        assert_eq!(buckets, vec![(1.0, 1), (5.0, 2), (3600.0, 3)]);

        assert_eq!(
            sample_value(
                &registry,
                "gpfs_mmdiag_waiter_info_count",
                &[("waiter", "RebuildWorkThread")]
            ),
            Some(2.0)
        );
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_mmdiag_waiter_info_count",
                &[("waiter", "MMFSADMDummyThread")]
            ),
            None
        );
    }

    #[tokio::test]
    async fn test_threshold_filters_short_waiters() {
        let mut collector = collector("1s,5s,60m");
        collector.threshold = 1.0;
        let runner = MockRunner::new().with_output("/usr/lpp/mmfs/bin/mmdiag --waiters -Y", OUTPUT);
        let registry = run(&collector, runner).await;

        let (count, _) = histogram_buckets(&registry, "gpfs_mmdiag_waiter_seconds", &[]).unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_empty_waiter_list_is_success() {
        let output = "\
mmdiag:waiters:HEADER:version:reserved:reserved:threadId:threadAddr:threadName:waitStartTime:waitTime:isMonitored:condVarAddr:condVarName:condVarReason:mutexAddr:mutexName:auxReason:delayTime:delayReason:
";
        let runner = MockRunner::new().with_output("/usr/lpp/mmfs/bin/mmdiag --waiters -Y", output);
        let registry = run(&collector("1s,5s,60m"), runner).await;

        let (count, _) = histogram_buckets(&registry, "gpfs_mmdiag_waiter_seconds", &[]).unwrap();
        assert_eq!(count, 0);
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_exporter_collect_error",
                &[("collector", "mmdiag")]
            ),
            Some(0.0)
        );
    }
}
