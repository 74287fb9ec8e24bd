//! CLI arguments for the scrape server.
//!
//! Flag names follow the established exporter convention of dotted long
//! options (`--collector.mmdf.timeout=60`). Collector toggles are value
//! flags so a default-on collector can be switched off with
//! `--collector.mmdf=false`.

use clap::{ArgAction, Parser, ValueEnum};

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Main CLI arguments structure
#[derive(Parser, Debug, Clone)]
#[command(
    name = "gpfs_exporter",
    about = "Prometheus exporter for GPFS (IBM Spectrum Scale) metrics",
    long_about = "Prometheus exporter for GPFS (IBM Spectrum Scale) metrics.\n\n\
                  Collects cluster state, capacity, I/O, quota and health telemetry by \
                  invoking the mm* administrative commands and exposes the results in \
                  the Prometheus text exposition format.",
    author = "Michael Moll <exporter@herakles.now> - Herakles",
    version,
    propagate_version = true
)]
pub struct Args {
    /// Address on which to expose metrics and web interface
    #[arg(long = "web.listen-address", default_value = ":9303")]
    pub listen_address: String,

    /// Exclude the exporter's own process/runtime metrics from the output
    #[arg(long = "web.disable-exporter-metrics", action = ArgAction::SetTrue)]
    pub disable_exporter_metrics: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Privilege escalation command prefixed to every mm* invocation (empty disables)
    #[arg(long = "exporter.sudo-command", default_value = "sudo")]
    pub sudo_command: String,

    /// Serve the last successful observation when a command fails
    #[arg(long = "exporter.use-cache", action = ArgAction::SetTrue)]
    pub use_cache: bool,

    /// Timeout (seconds) for mmlsfs filesystem enumeration
    #[arg(long = "collector.mmlsfs.timeout", default_value_t = 5)]
    pub mmlsfs_timeout: u64,

    // ---- mmgetstate ----
    /// Enable the mmgetstate collector
    #[arg(long = "collector.mmgetstate", default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub mmgetstate: bool,

    /// Timeout (seconds) for mmgetstate
    #[arg(long = "collector.mmgetstate.timeout", default_value_t = 5)]
    pub mmgetstate_timeout: u64,

    // ---- mmpmon ----
    /// Enable the mmpmon I/O counter collector
    #[arg(long = "collector.mmpmon", default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub mmpmon: bool,

    /// Timeout (seconds) for mmpmon
    #[arg(long = "collector.mmpmon.timeout", default_value_t = 5)]
    pub mmpmon_timeout: u64,

    // ---- mmdf ----
    /// Enable the mmdf capacity collector
    #[arg(long = "collector.mmdf", default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub mmdf: bool,

    /// Timeout (seconds) for each mmdf invocation
    #[arg(long = "collector.mmdf.timeout", default_value_t = 60)]
    pub mmdf_timeout: u64,

    /// Comma-separated filesystems to report (default: enumerate with mmlsfs)
    #[arg(long = "collector.mmdf.filesystems")]
    pub mmdf_filesystems: Option<String>,

    // ---- mount ----
    /// Enable the mount presence collector
    #[arg(long = "collector.mount", default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub mount: bool,

    /// Comma-separated mount points to check (default: every gpfs mount)
    #[arg(long = "collector.mount.mounts")]
    pub mount_mounts: Option<String>,

    // ---- mmhealth ----
    /// Enable the mmhealth collector
    #[arg(long = "collector.mmhealth", default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    pub mmhealth: bool,

    /// Timeout (seconds) for mmhealth
    #[arg(long = "collector.mmhealth.timeout", default_value_t = 5)]
    pub mmhealth_timeout: u64,

    /// Regex of components to ignore
    #[arg(long = "collector.mmhealth.ignored-component")]
    pub mmhealth_ignored_component: Option<String>,

    /// Regex of entity names to ignore
    #[arg(long = "collector.mmhealth.ignored-entityname")]
    pub mmhealth_ignored_entityname: Option<String>,

    /// Regex of entity types to ignore
    #[arg(long = "collector.mmhealth.ignored-entitytype")]
    pub mmhealth_ignored_entitytype: Option<String>,

    /// Regex of events to ignore
    #[arg(long = "collector.mmhealth.ignored-event")]
    pub mmhealth_ignored_event: Option<String>,

    // ---- mmdiag waiters ----
    /// Enable the mmdiag waiter collector
    #[arg(long = "collector.mmdiag", default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    pub mmdiag: bool,

    /// Timeout (seconds) for mmdiag
    #[arg(long = "collector.mmdiag.timeout", default_value_t = 5)]
    pub mmdiag_timeout: u64,

    /// Minimum waiter age (seconds) to report
    #[arg(long = "collector.mmdiag.waiter-threshold", default_value_t = 0)]
    pub waiter_threshold: u64,

    /// Regex of waiter thread names to exclude
    #[arg(
        long = "collector.waiter.exclude",
        default_value = "(EventsExporterSenderThread|MMFSADMDummyThread)"
    )]
    pub waiter_exclude: String,

    /// Histogram buckets as comma-separated human durations
    #[arg(long = "collector.waiter.buckets", default_value = "1s,5s,15s,1m,5m,60m")]
    pub waiter_buckets: String,

    /// Log the wait reason of every reported waiter
    #[arg(long = "collector.waiter.log-reason", action = ArgAction::SetTrue)]
    pub waiter_log_reason: bool,

    // ---- mmces ----
    /// Enable the mmces collector
    #[arg(long = "collector.mmces", default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    pub mmces: bool,

    /// Timeout (seconds) for mmces
    #[arg(long = "collector.mmces.timeout", default_value_t = 5)]
    pub mmces_timeout: u64,

    /// CES node to query (default: this node's hostname)
    #[arg(long = "collector.mmces.nodename")]
    pub mmces_nodename: Option<String>,

    /// Regex of CES services to ignore
    #[arg(long = "collector.mmces.ignored-services")]
    pub mmces_ignored_services: Option<String>,

    // ---- mmlssnapshot ----
    /// Enable the mmlssnapshot collector
    #[arg(long = "collector.mmlssnapshot", default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    pub mmlssnapshot: bool,

    /// Timeout (seconds) for each mmlssnapshot invocation
    #[arg(long = "collector.mmlssnapshot.timeout", default_value_t = 60)]
    pub mmlssnapshot_timeout: u64,

    /// Comma-separated filesystems to report (default: enumerate with mmlsfs)
    #[arg(long = "collector.mmlssnapshot.filesystems")]
    pub mmlssnapshot_filesystems: Option<String>,

    /// Also collect snapshot sizes (expensive on large filesystems)
    #[arg(long = "collector.mmlssnapshot.get-size", action = ArgAction::SetTrue)]
    pub mmlssnapshot_get_size: bool,

    // ---- mmlsfileset ----
    /// Enable the mmlsfileset collector
    #[arg(long = "collector.mmlsfileset", default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    pub mmlsfileset: bool,

    /// Timeout (seconds) for each mmlsfileset invocation
    #[arg(long = "collector.mmlsfileset.timeout", default_value_t = 60)]
    pub mmlsfileset_timeout: u64,

    /// Comma-separated filesystems to report (default: enumerate with mmlsfs)
    #[arg(long = "collector.mmlsfileset.filesystems")]
    pub mmlsfileset_filesystems: Option<String>,

    // ---- mmrepquota ----
    /// Enable the mmrepquota collector
    #[arg(long = "collector.mmrepquota", default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    pub mmrepquota: bool,

    /// Timeout (seconds) for each mmrepquota invocation
    #[arg(long = "collector.mmrepquota.timeout", default_value_t = 20)]
    pub mmrepquota_timeout: u64,

    /// Comma-separated filesystems to report (default: -a, all filesystems)
    #[arg(long = "collector.mmrepquota.filesystems")]
    pub mmrepquota_filesystems: Option<String>,

    /// Quota kinds to query: j (fileset), u (user), g (group)
    #[arg(long = "collector.mmrepquota.quotatypes", default_value = "j")]
    pub mmrepquota_quotatypes: String,

    // ---- mmlsqos ----
    /// Enable the mmlsqos collector
    #[arg(long = "collector.mmlsqos", default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    pub mmlsqos: bool,

    /// Timeout (seconds) for each mmlsqos invocation
    #[arg(long = "collector.mmlsqos.timeout", default_value_t = 60)]
    pub mmlsqos_timeout: u64,

    /// Comma-separated filesystems to report (default: enumerate with mmlsfs)
    #[arg(long = "collector.mmlsqos.filesystems")]
    pub mmlsqos_filesystems: Option<String>,

    // ---- mmlsdisk ----
    /// Enable the mmlsdisk collector
    #[arg(long = "collector.mmlsdisk", default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    pub mmlsdisk: bool,

    /// Timeout (seconds) for each mmlsdisk invocation
    #[arg(long = "collector.mmlsdisk.timeout", default_value_t = 30)]
    pub mmlsdisk_timeout: u64,

    /// Comma-separated filesystems to report (default: enumerate with mmlsfs)
    #[arg(long = "collector.mmlsdisk.filesystems")]
    pub mmlsdisk_filesystems: Option<String>,

    // ---- mmlspool ----
    /// Enable the mmlspool collector
    #[arg(long = "collector.mmlspool", default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    pub mmlspool: bool,

    /// Timeout (seconds) for each mmlspool invocation
    #[arg(long = "collector.mmlspool.timeout", default_value_t = 30)]
    pub mmlspool_timeout: u64,

    /// Comma-separated filesystems to report (default: enumerate with mmlsfs)
    #[arg(long = "collector.mmlspool.filesystems")]
    pub mmlspool_filesystems: Option<String>,

    // ---- verbs ----
    /// Enable the verbs RDMA status collector
    #[arg(long = "collector.verbs", default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    pub verbs: bool,

    /// Timeout (seconds) for mmfsadm
    #[arg(long = "collector.verbs.timeout", default_value_t = 5)]
    pub verbs_timeout: u64,

    // ---- config ----
    /// Enable the configuration value collector
    #[arg(long = "collector.config", default_value_t = false, action = ArgAction::Set, value_name = "BOOL")]
    pub config: bool,

    /// Timeout (seconds) for mmdiag --config
    #[arg(long = "collector.config.timeout", default_value_t = 5)]
    pub config_timeout: u64,

    /// Comma-separated configuration parameters to export
    #[arg(long = "collector.config.params", default_value = "pagepool")]
    pub config_params: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["gpfs_exporter"]);
        assert_eq!(args.listen_address, ":9303");
        assert!(args.mmgetstate);
        assert!(args.mmdf);
        assert!(!args.mmhealth);
        assert!(!args.use_cache);
        assert_eq!(args.mmdf_timeout, 60);
        assert_eq!(args.mmrepquota_quotatypes, "j");
    }

    #[test]
    fn test_collector_toggle_flags() {
        let args = Args::parse_from([
            "gpfs_exporter",
            "--collector.mmdf=false",
            "--collector.mmhealth=true",
            "--collector.mmdf.filesystems",
            "project,scratch",
            "--exporter.use-cache",
        ]);
        assert!(!args.mmdf);
        assert!(args.mmhealth);
        assert_eq!(args.mmdf_filesystems.as_deref(), Some("project,scratch"));
        assert!(args.use_cache);
    }
}
