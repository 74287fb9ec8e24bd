//! Protocol services collector (`mmces state show -N <node> -Y`).
//!
//! Unusual output shape: the column headers of the `mmcesstate` section are
//! the protocol service names themselves (NFS, SMB, OBJ, ...), and the
//! single body row carries one state per service. Parsed through the raw
//! section form since the field-setter tables cannot express data-bearing
//! headers.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use prometheus::{GaugeVec, Opts, Registry};
use regex::Regex;
use tracing::error;

use super::{emit_states, CollectError, Collector, Scrape, NAMESPACE};
use crate::cache::LastGood;
use crate::config::Config;
use crate::parser::parse_raw_section;

const MMCES: &str = "/usr/lpp/mmfs/bin/mmces";

/// CES service states. Anything else maps to `UNKNOWN`.
const KNOWN_STATES: &[&str] = &[
    "HEALTHY",
    "DEGRADED",
    "FAILED",
    "DEPEND",
    "SUSPENDED",
    "STARTING",
    "STOPPED",
    "DISABLED",
];

/// Header columns that are not service names.
const META_COLUMNS: &[&str] = &["", "HEADER", "version", "reserved", "NODE", "mmcesstate"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceState {
    pub service: String,
    pub state: String,
}

/// Zips the service-name headers against the first body row.
pub fn parse_ces_states(output: &str) -> Vec<ServiceState> {
    let Some(section) = parse_raw_section(output, "mmcesstate", "") else {
        return Vec::new();
    };
    let Some(row) = section.rows.first() else {
        return Vec::new();
    };

    section
        .headers
        .iter()
        .enumerate()
        .filter(|(_, header)| !META_COLUMNS.contains(&header.as_str()))
        .map(|(i, header)| ServiceState {
            service: header.clone(),
            state: row[i].clone(),
        })
        .collect()
}

pub struct MmcesCollector {
    timeout: Duration,
    nodename: String,
    ignored_services: Option<Regex>,
    cache: LastGood<Vec<ServiceState>>,
}

impl MmcesCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.mmces_timeout,
            nodename: config.mmces_nodename.clone(),
            ignored_services: config.mmces_ignored_services.clone(),
            cache: LastGood::new(),
        }
    }

    async fn scrape(&self, scrape: &Scrape) -> Result<Vec<ServiceState>, CollectError> {
        let output = scrape
            .runner
            .run(
                MMCES,
                &["state", "show", "-N", &self.nodename, "-Y"],
                None,
                self.timeout,
            )
            .await?;
        let states = parse_ces_states(&String::from_utf8_lossy(&output))
            .into_iter()
            .filter(|s| {
                self.ignored_services
                    .as_ref()
                    .map_or(true, |re| !re.is_match(&s.service))
            })
            .collect();
        Ok(states)
    }

    fn emit(&self, registry: &Registry, states: &[ServiceState]) -> Result<(), prometheus::Error> {
        let state = GaugeVec::new(
            Opts::new("state", "CES protocol service state (1 for the active state)")
                .namespace(NAMESPACE)
                .subsystem("ces"),
            &["service", "state"],
        )?;
        registry.register(Box::new(state.clone()))?;

        for record in states {
            emit_states(&state, &[&record.service], KNOWN_STATES, "UNKNOWN", &record.state);
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for MmcesCollector {
    fn name(&self) -> &'static str {
        "mmces"
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
                error!("mmces collector failed: {}", e);
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
