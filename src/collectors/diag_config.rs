//! Configuration value collector (`mmdiag --config -Y`).
//!
//! Exposes a whitelisted set of daemon configuration parameters. Only
//! numeric values can become samples; a whitelisted parameter with a
//! non-numeric value is skipped with a log line. `pagepool` gets its own
//! well-known family since it is the value operators alert on.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use prometheus::{Gauge, GaugeVec, Opts, Registry};
use tracing::{error, warn};

use super::{CollectError, Collector, Scrape, NAMESPACE};
use crate::cache::LastGood;
use crate::config::Config;
use crate::parser::{parse_section, FieldSetter};

const MMDIAG: &str = "/usr/lpp/mmfs/bin/mmdiag";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigValue {
    pub name: String,
    pub value: String,
}

const CONFIG_FIELDS: &[(&str, FieldSetter<ConfigValue>)] = &[
    ("name", |r, v| {
        r.name = v.to_string();
        Ok(())
    }),
    ("value", |r, v| {
        r.value = v.to_string();
        Ok(())
    }),
];

pub struct ConfigCollector {
    timeout: Duration,
    params: Vec<String>,
    cache: LastGood<Vec<ConfigValue>>,
}

impl ConfigCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.config_timeout,
            params: config.config_params.clone(),
            cache: LastGood::new(),
        }
    }

    async fn scrape(&self, scrape: &Scrape) -> Result<Vec<ConfigValue>, CollectError> {
        let output = scrape
            .runner
            .run(MMDIAG, &["--config", "-Y"], None, self.timeout)
            .await?;
        let text = String::from_utf8_lossy(&output);
        let values = parse_section(&text, "mmdiag", "config", CONFIG_FIELDS)?
            .into_iter()
            .filter(|v: &ConfigValue| self.params.iter().any(|p| p == &v.name))
            .collect();
        Ok(values)
    }

    fn emit(&self, registry: &Registry, values: &[ConfigValue]) -> Result<(), prometheus::Error> {
        let page_pool = Gauge::with_opts(
            Opts::new("page_pool_bytes", "Configured page pool size in bytes")
                .namespace(NAMESPACE)
                .subsystem("config"),
        )?;
        let value = GaugeVec::new(
            Opts::new("value", "Numeric daemon configuration values")
                .namespace(NAMESPACE)
                .subsystem("config"),
            &["param"],
        )?;
        registry.register(Box::new(page_pool.clone()))?;
        registry.register(Box::new(value.clone()))?;

        for config_value in values {
            let Ok(numeric) = config_value.value.parse::<f64>() else {
                warn!(
                    "configuration parameter {} has non-numeric value '{}'",
                    config_value.name, config_value.value
                );
                continue;
            };
            if config_value.name == "pagepool" {
                page_pool.set(numeric);
            } else {
                value.with_label_values(&[&config_value.name]).set(numeric);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for ConfigCollector {
    fn name(&self) -> &'static str {
        "config"
    }

    async fn collect(&self, scrape: &Scrape) -> Result<(), prometheus::Error> {
        let started = Instant::now();
        match self.scrape(scrape).await {
            Ok(values) => {
                if scrape.use_cache {
                    self.cache.store(&values);
                }
                self.emit(scrape.registry(), &values)?;
                scrape.metrics.report(self.name(), started, None);
            }
            Err(e) => {
                error!("config collector failed: {}", e);
                if scrape.use_cache {
                    if let Some(values) = self.cache.get() {
                        self.emit(scrape.registry(), &values)?;
                    }
                }
                scrape.metrics.report(self.name(), started, Some(&e));
            }
        }
        Ok(())
    }
}
