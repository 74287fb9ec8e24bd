//! Collector framework and the per-subsystem collectors.
//!
//! Every collector wraps one mm* administrative subcommand: it runs the
//! command through the [`CommandRunner`] seam with its own deadline, parses
//! the machine-readable output, and projects the records into its metric
//! families. All collectors self-report error/timeout/duration gauges so a
//! failing subsystem shows up in the scrape instead of failing it.

pub mod ces;
pub mod diag_config;
pub mod mmdf;
pub mod mmgetstate;
pub mod mmhealth;
pub mod mmlsdisk;
pub mod mmlsfileset;
pub mod mmlspool;
pub mod mmlsqos;
pub mod mmlssnapshot;
pub mod mmpmon;
pub mod mmrepquota;
pub mod mount;
pub mod verbs;
pub mod waiter;

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::future::join_all;
use prometheus::{GaugeVec, Opts, Registry};
use thiserror::Error;
use tracing::{debug, error};

use crate::config::Config;
use crate::parser::{parse_raw_section, ParseError};
use crate::runner::{CommandRunner, RunnerError};

/// Namespace prefix shared by every metric family.
pub const NAMESPACE: &str = "gpfs";

/// Subsystem under which the exporter reports about itself.
pub const EXPORTER_SUBSYSTEM: &str = "exporter";

/// Why a collector produced no fresh observation.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollectError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CollectError::Runner(e) if e.is_timeout())
    }
}

/// Per-collector self-observation gauges, registered once per scrape.
#[derive(Clone)]
pub struct SelfMetrics {
    collect_error: GaugeVec,
    collect_timeout: GaugeVec,
    duration: GaugeVec,
    last_execution: GaugeVec,
}

impl SelfMetrics {
    fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let collect_error = GaugeVec::new(
            Opts::new(
                "collect_error",
                "Indicates whether the most recent collection attempt failed",
            )
            .namespace(NAMESPACE)
            .subsystem(EXPORTER_SUBSYSTEM),
            &["collector"],
        )?;
        let collect_timeout = GaugeVec::new(
            Opts::new(
                "collect_timeout",
                "Indicates whether the most recent collection attempt hit its deadline",
            )
            .namespace(NAMESPACE)
            .subsystem(EXPORTER_SUBSYSTEM),
            &["collector"],
        )?;
        let duration = GaugeVec::new(
            Opts::new(
                "collector_duration_seconds",
                "Wall-clock duration of the most recent collection attempt",
            )
            .namespace(NAMESPACE)
            .subsystem(EXPORTER_SUBSYSTEM),
            &["collector"],
        )?;
        let last_execution = GaugeVec::new(
            Opts::new(
                "last_execution",
                "Unix time of the most recent successful collection",
            )
            .namespace(NAMESPACE)
            .subsystem(EXPORTER_SUBSYSTEM),
            &["collector"],
        )?;

        registry.register(Box::new(collect_error.clone()))?;
        registry.register(Box::new(collect_timeout.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(last_execution.clone()))?;

        Ok(Self {
            collect_error,
            collect_timeout,
            duration,
            last_execution,
        })
    }

    /// Records the outcome of one collection attempt under the given label.
    /// Timeouts are reported separately from other failures, and
    /// `last_execution` only moves on success.
    pub fn report(&self, label: &str, started: Instant, error: Option<&CollectError>) {
        let (is_error, is_timeout) = match error {
            None => (0.0, 0.0),
            Some(e) if e.is_timeout() => (0.0, 1.0),
            Some(_) => (1.0, 0.0),
        };
        self.collect_error.with_label_values(&[label]).set(is_error);
        self.collect_timeout
            .with_label_values(&[label])
            .set(is_timeout);
        self.duration
            .with_label_values(&[label])
            .set(started.elapsed().as_secs_f64());
        if error.is_none() {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64();
            self.last_execution.with_label_values(&[label]).set(now);
        }
    }
}

/// Per-scrape context handed to every collector: the fresh registry, the
/// command runner, the self-observation gauges and the cache flag.
pub struct Scrape {
    registry: Registry,
    pub runner: Arc<dyn CommandRunner>,
    pub metrics: SelfMetrics,
    pub use_cache: bool,
}

impl Scrape {
    pub fn new(runner: Arc<dyn CommandRunner>, use_cache: bool) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let metrics = SelfMetrics::register(&registry)?;
        Ok(Self {
            registry,
            runner,
            metrics,
            use_cache,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn into_registry(self) -> Registry {
        self.registry
    }
}

/// One observation source. `collect` registers the collector's metric
/// families against the scrape registry and fills them in; the returned
/// error covers registration problems only, command and parse failures are
/// absorbed into the self-observation gauges.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;
    async fn collect(&self, scrape: &Scrape) -> Result<(), prometheus::Error>;
}

/// A filesystem as enumerated by `mmlsfs all -Y`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filesystem {
    pub device: String,
    pub mount_point: String,
}

/// Runs the list-filesystems subcommand and returns the device names with
/// their default mount points. The `-Y` output carries one row per
/// (device, attribute) pair; only `defaultMountPoint` is consumed.
pub async fn enumerate_filesystems(
    scrape: &Scrape,
    timeout: Duration,
) -> Result<Vec<Filesystem>, CollectError> {
    let output = scrape
        .runner
        .run("/usr/lpp/mmfs/bin/mmlsfs", &["all", "-Y"], None, timeout)
        .await?;
    let text = String::from_utf8_lossy(&output);

    let mut filesystems: Vec<Filesystem> = Vec::new();
    let Some(section) = parse_raw_section(&text, "mmlsfs", "") else {
        return Ok(filesystems);
    };
    let Some(device_idx) = section.headers.iter().position(|h| h == "deviceName") else {
        return Ok(filesystems);
    };
    let field_idx = section.headers.iter().position(|h| h == "fieldName");
    let data_idx = section.headers.iter().position(|h| h == "data");

    for row in &section.rows {
        let device = row[device_idx].clone();
        let entry = match filesystems.iter_mut().find(|f| f.device == device) {
            Some(entry) => entry,
            None => {
                filesystems.push(Filesystem {
                    device,
                    mount_point: String::new(),
                });
                filesystems.last_mut().expect("just pushed")
            }
        };
        if let (Some(field_idx), Some(data_idx)) = (field_idx, data_idx) {
            if row[field_idx] == "defaultMountPoint" {
                entry.mount_point = urlencoding::decode(&row[data_idx])
                    .map(|d| d.into_owned())
                    .unwrap_or_else(|_| row[data_idx].clone());
            }
        }
    }
    Ok(filesystems)
}

/// Returns the filesystems a fan-out collector should visit: the explicit
/// flag value when configured, otherwise the enumerated device names. The
/// enumeration step self-reports under `<collector>-mmlsfs`; on enumeration
/// failure the collector emits no observations for this scrape.
pub(crate) async fn resolve_filesystems(
    scrape: &Scrape,
    explicit: Option<&[String]>,
    collector: &str,
    timeout: Duration,
) -> Option<Vec<String>> {
    if let Some(list) = explicit {
        return Some(list.to_vec());
    }
    let started = Instant::now();
    let label = format!("{}-mmlsfs", collector);
    match enumerate_filesystems(scrape, timeout).await {
        Ok(filesystems) => {
            scrape.metrics.report(&label, started, None);
            Some(filesystems.into_iter().map(|f| f.device).collect())
        }
        Err(e) => {
            error!("{}: filesystem enumeration failed: {}", collector, e);
            scrape.metrics.report(&label, started, Some(&e));
            None
        }
    }
}

/// Emits one 0/1 sample per known state plus the synthetic unknown state,
/// which is 1 iff the observed value is outside the enumeration. The state
/// name goes into the last label slot after `labels`.
pub(crate) fn emit_states(
    gauge: &GaugeVec,
    labels: &[&str],
    known: &[&str],
    unknown: &str,
    observed: &str,
) {
    let mut matched = false;
    for state in known {
        let hit = observed == *state;
        matched |= hit;
        let mut values = labels.to_vec();
        values.push(state);
        gauge
            .with_label_values(&values)
            .set(if hit { 1.0 } else { 0.0 });
    }
    let mut values = labels.to_vec();
    values.push(unknown);
    gauge
        .with_label_values(&values)
        .set(if matched { 0.0 } else { 1.0 });
}

/// Registration entry for one collector.
pub struct CollectorDescriptor {
    pub name: &'static str,
    pub default_enabled: bool,
    factory: fn(&Config) -> Box<dyn Collector>,
}

impl CollectorDescriptor {
    pub fn build(&self, config: &Config) -> Box<dyn Collector> {
        (self.factory)(config)
    }
}

/// The built-in collector set. An explicit list rather than global mutable
/// state; the enabled subset is chosen once at startup from the flags.
pub fn builtin() -> Vec<CollectorDescriptor> {
    vec![
        CollectorDescriptor {
            name: "mmgetstate",
            default_enabled: true,
            factory: |c| Box::new(mmgetstate::MmgetstateCollector::new(c)),
        },
        CollectorDescriptor {
            name: "mmpmon",
            default_enabled: true,
            factory: |c| Box::new(mmpmon::MmpmonCollector::new(c)),
        },
        CollectorDescriptor {
            name: "mmdf",
            default_enabled: true,
            factory: |c| Box::new(mmdf::MmdfCollector::new(c)),
        },
        CollectorDescriptor {
            name: "mount",
            default_enabled: true,
            factory: |c| Box::new(mount::MountCollector::new(c)),
        },
        CollectorDescriptor {
            name: "mmhealth",
            default_enabled: false,
            factory: |c| Box::new(mmhealth::MmhealthCollector::new(c)),
        },
        CollectorDescriptor {
            name: "mmdiag",
            default_enabled: false,
            factory: |c| Box::new(waiter::WaiterCollector::new(c)),
        },
        CollectorDescriptor {
            name: "mmces",
            default_enabled: false,
            factory: |c| Box::new(ces::MmcesCollector::new(c)),
        },
        CollectorDescriptor {
            name: "mmlssnapshot",
            default_enabled: false,
            factory: |c| Box::new(mmlssnapshot::MmlssnapshotCollector::new(c)),
        },
        CollectorDescriptor {
            name: "mmlsfileset",
            default_enabled: false,
            factory: |c| Box::new(mmlsfileset::MmlsfilesetCollector::new(c)),
        },
        CollectorDescriptor {
            name: "mmrepquota",
            default_enabled: false,
            factory: |c| Box::new(mmrepquota::MmrepquotaCollector::new(c)),
        },
        CollectorDescriptor {
            name: "mmlsqos",
            default_enabled: false,
            factory: |c| Box::new(mmlsqos::MmlsqosCollector::new(c)),
        },
        CollectorDescriptor {
            name: "mmlsdisk",
            default_enabled: false,
            factory: |c| Box::new(mmlsdisk::MmlsdiskCollector::new(c)),
        },
        CollectorDescriptor {
            name: "mmlspool",
            default_enabled: false,
            factory: |c| Box::new(mmlspool::MmlspoolCollector::new(c)),
        },
        CollectorDescriptor {
            name: "verbs",
            default_enabled: false,
            factory: |c| Box::new(verbs::VerbsCollector::new(c)),
        },
        CollectorDescriptor {
            name: "config",
            default_enabled: false,
            factory: |c| Box::new(diag_config::ConfigCollector::new(c)),
        },
    ]
}

/// The live collector set plus everything needed to run a scrape.
pub struct Exporter {
    collectors: Vec<Box<dyn Collector>>,
    runner: Arc<dyn CommandRunner>,
    use_cache: bool,
}

impl Exporter {
    /// Instantiates exactly the enabled collectors.
    pub fn from_config(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        let collectors: Vec<Box<dyn Collector>> = builtin()
            .iter()
            .filter(|descriptor| config.collector_enabled(descriptor.name))
            .map(|descriptor| descriptor.build(config))
            .collect();
        Self {
            collectors,
            runner,
            use_cache: config.use_cache,
        }
    }

    pub fn collector_names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    /// Runs one scrape: a fresh registry, all live collectors in parallel,
    /// joined before the registry is handed to the encoder.
    pub async fn gather(&self) -> Result<Registry, prometheus::Error> {
        let scrape = Scrape::new(self.runner.clone(), self.use_cache)?;
        let started = Instant::now();
        let results = join_all(
            self.collectors
                .iter()
                .map(|collector| collector.collect(&scrape)),
        )
        .await;
        for (collector, result) in self.collectors.iter().zip(results) {
            if let Err(e) = result {
                error!(
                    "collector {} could not register its metrics: {}",
                    collector.name(),
                    e
                );
            }
        }
        debug!(
            "scrape finished: {} collectors in {:?}",
            self.collectors.len(),
            started.elapsed()
        );
        Ok(scrape.into_registry())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockRunner;
    use crate::testutil::sample_value;

    const MMLSFS_OUTPUT: &str = "\
mmlsfs::HEADER:version:reserved:reserved:deviceName:fieldName:data:remarks:
mmlsfs::0:1:::project:defaultMountPoint:%2Ffs%2Fproject::
mmlsfs::0:1:::project:minFragmentSize:8192::
mmlsfs::0:1:::scratch:defaultMountPoint:%2Ffs%2Fscratch::
";

    fn scrape_with(runner: MockRunner) -> Scrape {
        Scrape::new(Arc::new(runner), false).unwrap()
    }

    #[tokio::test]
    async fn test_enumerate_filesystems() {
        let scrape = scrape_with(
            MockRunner::new().with_output("/usr/lpp/mmfs/bin/mmlsfs all -Y", MMLSFS_OUTPUT),
        );
        let filesystems = enumerate_filesystems(&scrape, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            filesystems,
            vec![
                Filesystem {
                    device: "project".to_string(),
                    mount_point: "/fs/project".to_string()
                },
                Filesystem {
                    device: "scratch".to_string(),
                    mount_point: "/fs/scratch".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_resolve_filesystems_explicit_list_skips_enumeration() {
        // No canned mmlsfs output: an enumeration attempt would fail.
        let scrape = scrape_with(MockRunner::new());
        let explicit = vec!["ess".to_string()];
        let resolved = resolve_filesystems(
            &scrape,
            Some(&explicit),
            "mmdf",
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(resolved, Some(vec!["ess".to_string()]));
    }

    #[tokio::test]
    async fn test_resolve_filesystems_reports_enumeration_failure() {
        let scrape =
            scrape_with(MockRunner::new().with_failure("/usr/lpp/mmfs/bin/mmlsfs all -Y"));
        let resolved = resolve_filesystems(&scrape, None, "mmdf", Duration::from_secs(5)).await;
        assert_eq!(resolved, None);

        let registry = scrape.into_registry();
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_exporter_collect_error",
                &[("collector", "mmdf-mmlsfs")]
            ),
            Some(1.0)
        );
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_exporter_collect_timeout",
                &[("collector", "mmdf-mmlsfs")]
            ),
            Some(0.0)
        );
    }

    #[test]
    fn test_builtin_registry_defaults() {
        let descriptors = builtin();
        assert_eq!(descriptors.len(), 15);
        let defaults: Vec<&str> = descriptors
            .iter()
            .filter(|d| d.default_enabled)
            .map(|d| d.name)
            .collect();
        assert_eq!(defaults, vec!["mmgetstate", "mmpmon", "mmdf", "mount"]);
    }

    #[test]
    fn test_exporter_from_config_picks_enabled_set() {
        let mut config = Config::default();
        config.enable_only(&["mmgetstate", "verbs"]);
        let exporter = Exporter::from_config(&config, Arc::new(MockRunner::new()));
        assert_eq!(exporter.collector_names(), vec!["mmgetstate", "verbs"]);
    }
}
