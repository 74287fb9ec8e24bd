//! One-shot batch export for the node-exporter textfile collector.
//!
//! Runs the capacity collector once and rewrites the output file atomically:
//! the new exposition is written to a temp file in the target directory and
//! renamed over the previous one, so a concurrently-reading textfile
//! collector never sees a partial file. Families already in the output file
//! that belong to other producers (no `gpfs_` prefix) are carried over
//! verbatim.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use nix::fcntl::{Flock, FlockArg};
use prometheus::{Encoder, Registry, TextEncoder};
use tempfile::NamedTempFile;
use tracing::info;

use crate::collectors::Exporter;

/// Takes the advisory run lock. Fails without blocking when another run
/// holds it; the output file is untouched in that case. The lock is
/// released when the returned guard is dropped.
pub fn acquire_lock(path: &Path) -> Result<Flock<fs::File>> {
    let file = fs::File::options()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .with_context(|| format!("unable to open lockfile {}", path.display()))?;
    Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
        anyhow!(
            "lockfile {} is held by another run ({})",
            path.display(),
            errno
        )
    })
}

/// Collector labels whose error or timeout self-metric is set in the
/// gathered registry.
pub fn collect_failures(registry: &Registry) -> Vec<String> {
    let mut failed = Vec::new();
    for family in registry.gather() {
        let name = family.get_name();
        if name != "gpfs_exporter_collect_error" && name != "gpfs_exporter_collect_timeout" {
            continue;
        }
        for metric in family.get_metric() {
            if metric.gauge.value() == 0.0 {
                continue;
            }
            for label in metric.get_label() {
                if label.get_name() == "collector" {
                    failed.push(label.get_value().to_string());
                }
            }
        }
    }
    failed.sort();
    failed.dedup();
    failed
}

fn family_of(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(comment) = trimmed.strip_prefix('#') {
        // "# HELP <name> ..." / "# TYPE <name> ..."
        let mut tokens = comment.split_whitespace();
        let _kind = tokens.next()?;
        return tokens.next();
    }
    Some(
        trimmed
            .split(|c| c == '{' || c == ' ')
            .next()
            .unwrap_or(trimmed),
    )
}

/// Lines of the previous output file that belong to non-gpfs families.
pub fn preserved_families(previous: &str) -> String {
    let mut preserved = String::new();
    for line in previous.lines() {
        let Some(family) = family_of(line) else {
            continue;
        };
        if !family.starts_with("gpfs_") {
            preserved.push_str(line);
            preserved.push('\n');
        }
    }
    preserved
}

/// Writes the file through a rename in the same directory, mode 0644.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(content.as_bytes())
        .context("failed to write metrics")?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(0o644))
        .context("failed to set permissions")?;
    tmp.persist(path)
        .with_context(|| format!("failed to rename into {}", path.display()))?;
    Ok(())
}

/// Runs one gather and rewrites the output file. Returns the labels of
/// failed collectors; the file is written either way so the failure is
/// visible to whoever scrapes it.
pub async fn run(exporter: &Exporter, output: &Path) -> Result<Vec<String>> {
    let registry = exporter.gather().await.context("failed to gather metrics")?;
    let failures = collect_failures(&registry);

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("failed to encode metrics")?;
    let exposition = String::from_utf8(buffer).context("encoded metrics are not utf-8")?;

    let mut content = match fs::read_to_string(output) {
        Ok(previous) => preserved_families(&previous),
        Err(_) => String::new(),
    };
    content.push_str(&exposition);

    write_atomic(output, &content)?;
    info!("Wrote {} bytes to {}", content.len(), output.display());
    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::runner::MockRunner;
    use std::sync::Arc;

    const MMDF_OUTPUT: &str = "\
mmdf:inode:HEADER:version:reserved:reserved:usedInodes:freeInodes:allocatedInodes:maxInodes:
mmdf:inode:0:1:::430741822:484301506:915043328:1332164000:
mmdf:fsTotal:HEADER:version:reserved:reserved:fsSize:freeBlocks:freeBlocksPct:
mmdf:fsTotal:0:1:::3661677723648:481202021888:14:
";

    fn exporter(runner: MockRunner) -> Exporter {
        let mut config = Config::default();
        config.enable_only(&["mmdf"]);
        config.mmdf_filesystems = Some(vec!["project".to_string()]);
        Exporter::from_config(&config, Arc::new(runner))
    }

    #[test]
    fn test_preserved_families() {
        let previous = "\
# HELP node_boot_time_seconds Node boot time.
# TYPE node_boot_time_seconds gauge
node_boot_time_seconds 1.594e+09
# HELP gpfs_fs_size_bytes Filesystem size in bytes
# TYPE gpfs_fs_size_bytes gauge
gpfs_fs_size_bytes{fs=\"project\"} 1
";
        let preserved = preserved_families(previous);
        assert!(preserved.contains("node_boot_time_seconds 1.594e+09"));
        assert!(!preserved.contains("gpfs_fs_size_bytes"));
    }

    #[tokio::test]
    async fn test_run_writes_capacity_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("gpfs.prom");

        let runner = MockRunner::new().with_output("/usr/lpp/mmfs/bin/mmdf project -Y", MMDF_OUTPUT);
        let failures = run(&exporter(runner), &output).await.unwrap();
        assert!(failures.is_empty());

        let content = fs::read_to_string(&output).unwrap();
        assert!(content.contains("gpfs_fs_size_bytes{fs=\"project\"} 3749557989015552"));
        assert!(content.contains("gpfs_exporter_collect_error{collector=\"mmdf-project\"} 0"));

        let mode = fs::metadata(&output).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[tokio::test]
    async fn test_run_preserves_foreign_families() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("gpfs.prom");
        fs::write(&output, "node_custom_metric 42\ngpfs_fs_size_bytes{fs=\"old\"} 1\n").unwrap();

        let runner = MockRunner::new().with_output("/usr/lpp/mmfs/bin/mmdf project -Y", MMDF_OUTPUT);
        run(&exporter(runner), &output).await.unwrap();

        let content = fs::read_to_string(&output).unwrap();
        assert!(content.contains("node_custom_metric 42"));
        // Stale gpfs samples are replaced, not accumulated.
        assert!(!content.contains("fs=\"old\""));
        assert!(content.contains("fs=\"project\""));
    }

    #[test]
    fn test_lock_refuses_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let lockfile = dir.path().join("run.lock");

        let held = acquire_lock(&lockfile).unwrap();
        assert!(acquire_lock(&lockfile).is_err());

        drop(held);
        assert!(acquire_lock(&lockfile).is_ok());
    }

    #[test]
    fn test_write_atomic_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("missing").join("gpfs.prom");
        assert!(write_atomic(&output, "gpfs_fs_size_bytes 1\n").is_err());
    }

    #[test]
    fn test_failed_write_leaves_previous_output_intact() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("gpfs.prom");
        fs::write(&output, "gpfs_fs_size_bytes 1\n").unwrap();

        // The temp file cannot be created below a regular file.
        let unwritable = output.join("gpfs.prom");
        assert!(write_atomic(&unwritable, "gpfs_fs_size_bytes 2\n").is_err());
        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            "gpfs_fs_size_bytes 1\n"
        );
    }

    #[tokio::test]
    async fn test_run_reports_failures_and_still_writes() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("gpfs.prom");

        let runner = MockRunner::new().with_failure("/usr/lpp/mmfs/bin/mmdf project -Y");
        let failures = run(&exporter(runner), &output).await.unwrap();
        assert_eq!(failures, vec!["mmdf-project".to_string()]);

        let content = fs::read_to_string(&output).unwrap();
        assert!(content.contains("gpfs_exporter_collect_error{collector=\"mmdf-project\"} 1"));
    }
}
