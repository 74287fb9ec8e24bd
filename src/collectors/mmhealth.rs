//! Node health collector (`mmhealth node show -Y`).
//!
//! The output carries two sections: `State` rows with the health status of
//! every monitored entity and `Event` rows with currently active events.
//! Each ignore regex drops matching records before any metric is emitted.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use prometheus::{GaugeVec, Opts, Registry};
use regex::Regex;
use tracing::error;

use super::{emit_states, CollectError, Collector, Scrape, NAMESPACE};
use crate::cache::LastGood;
use crate::config::Config;
use crate::parser::{parse_section, FieldSetter};

const MMHEALTH: &str = "/usr/lpp/mmfs/bin/mmhealth";

/// Health states the monitor reports. Anything else maps to `UNKNOWN`.
const KNOWN_STATES: &[&str] = &[
    "HEALTHY",
    "CHECKING",
    "DEGRADED",
    "FAILED",
    "DISABLED",
    "STARTING",
    "STOPPED",
    "SUSPENDED",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthState {
    pub component: String,
    pub entity_name: String,
    pub entity_type: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthEvent {
    pub component: String,
    pub entity_name: String,
    pub entity_type: String,
    pub event: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Health {
    pub states: Vec<HealthState>,
    pub events: Vec<HealthEvent>,
}

const STATE_FIELDS: &[(&str, FieldSetter<HealthState>)] = &[
    ("component", |r, v| {
        r.component = v.to_string();
        Ok(())
    }),
    ("entityname", |r, v| {
        r.entity_name = v.to_string();
        Ok(())
    }),
    ("entitytype", |r, v| {
        r.entity_type = v.to_string();
        Ok(())
    }),
    ("status", |r, v| {
        r.status = v.to_string();
        Ok(())
    }),
];

const EVENT_FIELDS: &[(&str, FieldSetter<HealthEvent>)] = &[
    ("component", |r, v| {
        r.component = v.to_string();
        Ok(())
    }),
    ("entityname", |r, v| {
        r.entity_name = v.to_string();
        Ok(())
    }),
    ("entitytype", |r, v| {
        r.entity_type = v.to_string();
        Ok(())
    }),
    ("event", |r, v| {
        r.event = v.to_string();
        Ok(())
    }),
];

pub struct MmhealthCollector {
    timeout: Duration,
    ignored_component: Option<Regex>,
    ignored_entityname: Option<Regex>,
    ignored_entitytype: Option<Regex>,
    ignored_event: Option<Regex>,
    cache: LastGood<Health>,
}

fn ignored(pattern: &Option<Regex>, value: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(value))
}

impl MmhealthCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.mmhealth_timeout,
            ignored_component: config.mmhealth_ignored_component.clone(),
            ignored_entityname: config.mmhealth_ignored_entityname.clone(),
            ignored_entitytype: config.mmhealth_ignored_entitytype.clone(),
            ignored_event: config.mmhealth_ignored_event.clone(),
            cache: LastGood::new(),
        }
    }

    fn keep_entity(&self, component: &str, entity_name: &str, entity_type: &str) -> bool {
        !ignored(&self.ignored_component, component)
            && !ignored(&self.ignored_entityname, entity_name)
            && !ignored(&self.ignored_entitytype, entity_type)
    }

    async fn scrape(&self, scrape: &Scrape) -> Result<Health, CollectError> {
        let output = scrape
            .runner
            .run(MMHEALTH, &["node", "show", "-Y"], None, self.timeout)
            .await?;
        let text = String::from_utf8_lossy(&output);

        let states = parse_section(&text, "mmhealth", "State", STATE_FIELDS)?
            .into_iter()
            .filter(|s: &HealthState| {
                self.keep_entity(&s.component, &s.entity_name, &s.entity_type)
            })
            .collect();
        let events = parse_section(&text, "mmhealth", "Event", EVENT_FIELDS)?
            .into_iter()
            .filter(|e: &HealthEvent| {
                self.keep_entity(&e.component, &e.entity_name, &e.entity_type)
                    && !ignored(&self.ignored_event, &e.event)
            })
            .collect();
        Ok(Health { states, events })
    }

    fn emit(&self, registry: &Registry, health: &Health) -> Result<(), prometheus::Error> {
        let status = GaugeVec::new(
            Opts::new("status", "Health status of each monitored entity")
                .namespace(NAMESPACE)
                .subsystem("health"),
            &["component", "entityname", "entitytype", "status"],
        )?;
        let event = GaugeVec::new(
            Opts::new("event", "Active health events")
                .namespace(NAMESPACE)
                .subsystem("health"),
            &["component", "entityname", "entitytype", "event"],
        )?;
        registry.register(Box::new(status.clone()))?;
        registry.register(Box::new(event.clone()))?;

        for state in &health.states {
            emit_states(
                &status,
                &[&state.component, &state.entity_name, &state.entity_type],
                KNOWN_STATES,
                "UNKNOWN",
                &state.status,
            );
        }
        for record in &health.events {
            event
                .with_label_values(&[
                    &record.component,
                    &record.entity_name,
                    &record.entity_type,
                    &record.event,
                ])
                .set(1.0);
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for MmhealthCollector {
    fn name(&self) -> &'static str {
        "mmhealth"
    }

    async fn collect(&self, scrape: &Scrape) -> Result<(), prometheus::Error> {
        let started = Instant::now();
        match self.scrape(scrape).await {
            Ok(health) => {
                if scrape.use_cache {
                    self.cache.store(&health);
                }
                self.emit(scrape.registry(), &health)?;
                scrape.metrics.report(self.name(), started, None);
            }
            Err(e) => {
                error!("mmhealth collector failed: {}", e);
                if scrape.use_cache {
                    if let Some(health) = self.cache.get() {
                        self.emit(scrape.registry(), &health)?;
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
    use crate::testutil::{family_size, sample_value};
    use std::sync::Arc;

    const OUTPUT: &str = "\
mmhealth:State:HEADER:version:reserved:reserved:node:component:entityname:entitytype:status:laststatuschange:
mmhealth:State:0:1:::ib-proj-rw02:NODE:ib-proj-rw02:NODE:DEGRADED:2020-01-07 16%3A47%3A39.398817 CET:
mmhealth:State:0:1:::ib-proj-rw02:GPFS:ib-proj-rw02:NODE:HEALTHY:2020-01-07 16%3A47%3A39.398817 CET:
mmhealth:State:0:1:::ib-proj-rw02:NETWORK:ib0:NIC:FLAKY:2020-01-07 16%3A47%3A39.398817 CET:
mmhealth:Event:HEADER:version:reserved:reserved:node:component:entityname:entitytype:event:arguments:activesince:identifier:ishidden:
mmhealth:Event:0:1:::ib-proj-rw02:NETWORK:ib0:NIC:ib_rdma_link_down:ib0:2020-01-07 16%3A47%3A30.077722 CET::no:
";

    fn collector() -> MmhealthCollector {
        MmhealthCollector::new(&Config::default())
    }

    async fn run(collector: &MmhealthCollector, runner: MockRunner) -> prometheus::Registry {
        let scrape = Scrape::new(Arc::new(runner), false).unwrap();
        collector.collect(&scrape).await.unwrap();
        scrape.into_registry()
    }

    #[tokio::test]
    async fn test_status_enumeration() {
        let runner =
            MockRunner::new().with_output("/usr/lpp/mmfs/bin/mmhealth node show -Y", OUTPUT);
        let registry = run(&collector(), runner).await;

        assert_eq!(
            sample_value(
                &registry,
                "gpfs_health_status",
                &[("component", "NODE"), ("status", "DEGRADED")]
            ),
            Some(1.0)
        );
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_health_status",
                &[("component", "NODE"), ("status", "HEALTHY")]
            ),
            Some(0.0)
        );
        // A state outside the enumeration lands on UNKNOWN.
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_health_status",
                &[("entityname", "ib0"), ("status", "UNKNOWN")]
            ),
            Some(1.0)
        );
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_health_event",
                &[("entityname", "ib0"), ("event", "ib_rdma_link_down")]
            ),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_ignore_filters() {
        let mut collector = collector();
        collector.ignored_component = Some(Regex::new("^NETWORK$").unwrap());
        let runner =
            MockRunner::new().with_output("/usr/lpp/mmfs/bin/mmhealth node show -Y", OUTPUT);
        let registry = run(&collector, runner).await;

        assert_eq!(
            sample_value(
                &registry,
                "gpfs_health_status",
                &[("component", "NETWORK"), ("status", "UNKNOWN")]
            ),
            None
        );
        assert_eq!(family_size(&registry, "gpfs_health_event"), 0);
        // Unfiltered components are still present.
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_health_status",
                &[("component", "GPFS"), ("status", "HEALTHY")]
            ),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_failure_reported() {
        let runner = MockRunner::new().with_failure("/usr/lpp/mmfs/bin/mmhealth node show -Y");
        let registry = run(&collector(), runner).await;
        assert_eq!(
            sample_value(
                &registry,
                "gpfs_exporter_collect_error",
                &[("collector", "mmhealth")]
            ),
            Some(1.0)
        );
        assert_eq!(family_size(&registry, "gpfs_health_status"), 0);
    }
}
