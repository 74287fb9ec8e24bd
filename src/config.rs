//! Resolved runtime configuration.
//!
//! [`Config`] is the validated form of the CLI surface: durations instead of
//! raw seconds, compiled regexes, parsed filesystem lists and histogram
//! buckets. Invalid values are rejected at startup rather than per scrape.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;

use crate::cli::Args;

/// Quota domain queried by mmrepquota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    User,
    Group,
    Fileset,
}

impl QuotaKind {
    /// mmrepquota flag selecting this kind.
    pub fn flag(&self) -> &'static str {
        match self {
            QuotaKind::User => "-u",
            QuotaKind::Group => "-g",
            QuotaKind::Fileset => "-j",
        }
    }

    /// Metric subsystem and principal label for this kind.
    pub fn label(&self) -> &'static str {
        match self {
            QuotaKind::User => "user",
            QuotaKind::Group => "group",
            QuotaKind::Fileset => "fileset",
        }
    }

    fn from_letter(letter: &str) -> Option<Self> {
        match letter {
            "u" => Some(QuotaKind::User),
            "g" => Some(QuotaKind::Group),
            "j" => Some(QuotaKind::Fileset),
            _ => None,
        }
    }
}

/// Validated process configuration shared by both entry points.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_address: SocketAddr,
    pub disable_exporter_metrics: bool,
    pub sudo_command: String,
    pub use_cache: bool,

    enabled: HashMap<&'static str, bool>,

    pub mmlsfs_timeout: Duration,

    pub mmgetstate_timeout: Duration,

    pub mmpmon_timeout: Duration,

    pub mmdf_timeout: Duration,
    pub mmdf_filesystems: Option<Vec<String>>,

    pub mount_mounts: Option<Vec<String>>,

    pub mmhealth_timeout: Duration,
    pub mmhealth_ignored_component: Option<Regex>,
    pub mmhealth_ignored_entityname: Option<Regex>,
    pub mmhealth_ignored_entitytype: Option<Regex>,
    pub mmhealth_ignored_event: Option<Regex>,

    pub mmdiag_timeout: Duration,
    pub waiter_threshold: f64,
    pub waiter_exclude: Regex,
    pub waiter_buckets: Vec<f64>,
    pub waiter_log_reason: bool,

    pub mmces_timeout: Duration,
    pub mmces_nodename: String,
    pub mmces_ignored_services: Option<Regex>,

    pub mmlssnapshot_timeout: Duration,
    pub mmlssnapshot_filesystems: Option<Vec<String>>,
    pub mmlssnapshot_get_size: bool,

    pub mmlsfileset_timeout: Duration,
    pub mmlsfileset_filesystems: Option<Vec<String>>,

    pub mmrepquota_timeout: Duration,
    pub mmrepquota_filesystems: Option<Vec<String>>,
    pub mmrepquota_quota_kinds: Vec<QuotaKind>,

    pub mmlsqos_timeout: Duration,
    pub mmlsqos_filesystems: Option<Vec<String>>,

    pub mmlsdisk_timeout: Duration,
    pub mmlsdisk_filesystems: Option<Vec<String>>,

    pub mmlspool_timeout: Duration,
    pub mmlspool_filesystems: Option<Vec<String>>,

    pub verbs_timeout: Duration,

    pub config_timeout: Duration,
    pub config_params: Vec<String>,
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self> {
        let enabled = HashMap::from([
            ("mmgetstate", args.mmgetstate),
            ("mmpmon", args.mmpmon),
            ("mmdf", args.mmdf),
            ("mount", args.mount),
            ("mmhealth", args.mmhealth),
            ("mmdiag", args.mmdiag),
            ("mmces", args.mmces),
            ("mmlssnapshot", args.mmlssnapshot),
            ("mmlsfileset", args.mmlsfileset),
            ("mmrepquota", args.mmrepquota),
            ("mmlsqos", args.mmlsqos),
            ("mmlsdisk", args.mmlsdisk),
            ("mmlspool", args.mmlspool),
            ("verbs", args.verbs),
            ("config", args.config),
        ]);

        let mmces_nodename = match &args.mmces_nodename {
            Some(name) => name.clone(),
            None => whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string()),
        };

        Ok(Config {
            listen_address: parse_listen_address(&args.listen_address)?,
            disable_exporter_metrics: args.disable_exporter_metrics,
            sudo_command: args.sudo_command.clone(),
            use_cache: args.use_cache,
            enabled,
            mmlsfs_timeout: Duration::from_secs(args.mmlsfs_timeout),
            mmgetstate_timeout: Duration::from_secs(args.mmgetstate_timeout),
            mmpmon_timeout: Duration::from_secs(args.mmpmon_timeout),
            mmdf_timeout: Duration::from_secs(args.mmdf_timeout),
            mmdf_filesystems: parse_list(args.mmdf_filesystems.as_deref()),
            mount_mounts: parse_list(args.mount_mounts.as_deref()),
            mmhealth_timeout: Duration::from_secs(args.mmhealth_timeout),
            mmhealth_ignored_component: compile_ignore(
                args.mmhealth_ignored_component.as_deref(),
                "collector.mmhealth.ignored-component",
            )?,
            mmhealth_ignored_entityname: compile_ignore(
                args.mmhealth_ignored_entityname.as_deref(),
                "collector.mmhealth.ignored-entityname",
            )?,
            mmhealth_ignored_entitytype: compile_ignore(
                args.mmhealth_ignored_entitytype.as_deref(),
                "collector.mmhealth.ignored-entitytype",
            )?,
            mmhealth_ignored_event: compile_ignore(
                args.mmhealth_ignored_event.as_deref(),
                "collector.mmhealth.ignored-event",
            )?,
            mmdiag_timeout: Duration::from_secs(args.mmdiag_timeout),
            waiter_threshold: args.waiter_threshold as f64,
            waiter_exclude: Regex::new(&args.waiter_exclude)
                .context("invalid regex for --collector.waiter.exclude")?,
            waiter_buckets: parse_buckets(&args.waiter_buckets)?,
            waiter_log_reason: args.waiter_log_reason,
            mmces_timeout: Duration::from_secs(args.mmces_timeout),
            mmces_nodename,
            mmces_ignored_services: compile_ignore(
                args.mmces_ignored_services.as_deref(),
                "collector.mmces.ignored-services",
            )?,
            mmlssnapshot_timeout: Duration::from_secs(args.mmlssnapshot_timeout),
            mmlssnapshot_filesystems: parse_list(args.mmlssnapshot_filesystems.as_deref()),
            mmlssnapshot_get_size: args.mmlssnapshot_get_size,
            mmlsfileset_timeout: Duration::from_secs(args.mmlsfileset_timeout),
            mmlsfileset_filesystems: parse_list(args.mmlsfileset_filesystems.as_deref()),
            mmrepquota_timeout: Duration::from_secs(args.mmrepquota_timeout),
            mmrepquota_filesystems: parse_list(args.mmrepquota_filesystems.as_deref()),
            mmrepquota_quota_kinds: parse_quota_kinds(&args.mmrepquota_quotatypes)?,
            mmlsqos_timeout: Duration::from_secs(args.mmlsqos_timeout),
            mmlsqos_filesystems: parse_list(args.mmlsqos_filesystems.as_deref()),
            mmlsdisk_timeout: Duration::from_secs(args.mmlsdisk_timeout),
            mmlsdisk_filesystems: parse_list(args.mmlsdisk_filesystems.as_deref()),
            mmlspool_timeout: Duration::from_secs(args.mmlspool_timeout),
            mmlspool_filesystems: parse_list(args.mmlspool_filesystems.as_deref()),
            verbs_timeout: Duration::from_secs(args.verbs_timeout),
            config_timeout: Duration::from_secs(args.config_timeout),
            config_params: parse_list(Some(&args.config_params)).unwrap_or_default(),
        })
    }

    /// Whether the named collector is switched on.
    pub fn collector_enabled(&self, name: &str) -> bool {
        self.enabled.get(name).copied().unwrap_or(false)
    }

    /// Switches on exactly the named collectors. Used by the one-shot batch
    /// exporter, which only ever runs the capacity collector.
    pub fn enable_only(&mut self, names: &[&'static str]) {
        for value in self.enabled.values_mut() {
            *value = false;
        }
        for name in names {
            self.enabled.insert(name, true);
        }
    }
}

impl Default for Config {
    /// Configuration with every flag at its CLI default.
    fn default() -> Self {
        use clap::Parser;
        Config::from_args(&Args::parse_from(["gpfs_exporter"]))
            .expect("default configuration is valid")
    }
}

/// Accepts `:9303` shorthand for an all-interfaces bind.
fn parse_listen_address(address: &str) -> Result<SocketAddr> {
    let full = if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    };
    full.parse()
        .with_context(|| format!("invalid listen address '{}'", address))
}

/// Splits a comma-separated flag value, dropping empty entries.
/// Returns None when nothing remains so callers can fall back to enumeration.
fn parse_list(value: Option<&str>) -> Option<Vec<String>> {
    let items: Vec<String> = value?
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn compile_ignore(pattern: Option<&str>, flag: &str) -> Result<Option<Regex>> {
    match pattern {
        Some(pattern) => Ok(Some(
            Regex::new(pattern).with_context(|| format!("invalid regex for --{}", flag))?,
        )),
        None => Ok(None),
    }
}

fn parse_quota_kinds(spec: &str) -> Result<Vec<QuotaKind>> {
    let mut kinds = Vec::new();
    for letter in spec.split(',').map(str::trim).filter(|l| !l.is_empty()) {
        match QuotaKind::from_letter(letter) {
            Some(kind) if !kinds.contains(&kind) => kinds.push(kind),
            Some(_) => {}
            None => bail!("unknown quota type '{}' (expected u, g or j)", letter),
        }
    }
    if kinds.is_empty() {
        bail!("--collector.mmrepquota.quotatypes must name at least one of u, g, j");
    }
    Ok(kinds)
}

/// Parses `1s,5m,60m`-style bucket specs into ascending seconds.
pub fn parse_buckets(spec: &str) -> Result<Vec<f64>> {
    let mut buckets = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        buckets.push(parse_duration_seconds(part)?);
    }
    if buckets.is_empty() {
        bail!("--collector.waiter.buckets must contain at least one duration");
    }
    // The histogram constructor requires ascending bucket bounds.
    buckets.sort_by(f64::total_cmp);
    buckets.dedup();
    Ok(buckets)
}

fn parse_duration_seconds(value: &str) -> Result<f64> {
    let (number, scale) = if let Some(number) = value.strip_suffix("ms") {
        (number, 0.001)
    } else if let Some(number) = value.strip_suffix('s') {
        (number, 1.0)
    } else if let Some(number) = value.strip_suffix('m') {
        (number, 60.0)
    } else if let Some(number) = value.strip_suffix('h') {
        (number, 3600.0)
    } else {
        (value, 1.0)
    };
    let number: f64 = number
        .parse()
        .with_context(|| format!("invalid duration '{}'", value))?;
    Ok(number * scale)
}
