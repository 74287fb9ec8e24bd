//! Cluster daemon state collector (`mmgetstate -Y`).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use prometheus::{GaugeVec, Opts, Registry};
use tracing::error;

use super::{emit_states, CollectError, Collector, Scrape, NAMESPACE};
use crate::cache::LastGood;
use crate::config::Config;
use crate::parser::{parse_section, FieldSetter};

const MMGETSTATE: &str = "/usr/lpp/mmfs/bin/mmgetstate";

/// GPFS daemon states reported by mmgetstate. Anything else maps to the
/// synthetic `unknown` state.
const KNOWN_STATES: &[&str] = &["active", "arbitrating", "down"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeState {
    state: String,
}

const STATE_FIELDS: &[(&str, FieldSetter<NodeState>)] = &[("state", |record, value| {
    record.state = value.to_string();
    Ok(())
})];

pub struct MmgetstateCollector {
    timeout: Duration,
    cache: LastGood<Vec<NodeState>>,
}

impl MmgetstateCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.mmgetstate_timeout,
            cache: LastGood::new(),
        }
    }

    async fn scrape(&self, scrape: &Scrape) -> Result<Vec<NodeState>, CollectError> {
        let output = scrape
            .runner
            .run(MMGETSTATE, &["-Y"], None, self.timeout)
            .await?;
        let text = String::from_utf8_lossy(&output);
        Ok(parse_section(&text, "mmgetstate", "", STATE_FIELDS)?)
    }

    fn emit(&self, registry: &Registry, states: &[NodeState]) -> Result<(), prometheus::Error> {
        let state = GaugeVec::new(
            Opts::new("state", "GPFS daemon state (1 for the active state)")
                .namespace(NAMESPACE)
                .subsystem("mmgetstate"),
            &["state"],
        )?;
        registry.register(Box::new(state.clone()))?;

        for record in states {
            emit_states(&state, &[], KNOWN_STATES, "unknown", &record.state);
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for MmgetstateCollector {
    fn name(&self) -> &'static str {
        "mmgetstate"
    }

    async fn collect(&self, scrape: &Scrape) -> Result<(), prometheus::Error> {
        let started = Instant::now();
        match self.scrape(scrape).await {
            Ok(states) => {
                if scrape.use_cache {
                    self.cache.store(&states);
                }
                self.emit(scrape.registry(), &states)?;
                scrape.metrics.report(self.name(), started, None);
            }
            Err(e) => {
                error!("mmgetstate collector failed: {}", e);
                if scrape.use_cache {
                    if let Some(states) = self.cache.get() {
                        self.emit(scrape.registry(), &states)?;
                    }
                }
                scrape.metrics.report(self.name(), started, Some(&e));
            }
        }
        Ok(())
    }
}
