//! End-to-end scrapes through the exporter with canned command output.

use std::sync::Arc;
use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use gpfs_exporter::collectors::Exporter;
use gpfs_exporter::config::Config;
use gpfs_exporter::runner::MockRunner;
use gpfs_exporter::testutil::{histogram_buckets, sample_value};

const MMGETSTATE_OUTPUT: &str = "\
mmgetstate::HEADER:version:reserved:reserved:nodeName:nodeNumber:state:quorum:nodesUp:totalNodes:remarks:cnfsState:
mmgetstate::0:1:::node1:3:active:2:3:3::(undefined):
";

const MMDF_OUTPUT: &str = "\
mmdf:inode:HEADER:version:reserved:reserved:usedInodes:freeInodes:allocatedInodes:maxInodes:
mmdf:inode:0:1:::430741822:484301506:915043328:1332164000:
mmdf:fsTotal:HEADER:version:reserved:reserved:fsSize:freeBlocks:freeBlocksPct:
mmdf:fsTotal:0:1:::3661677723648:481202021888:14:
mmdf:poolTotal:HEADER:version:reserved:reserved:poolName:poolSize:freeBlocks:freeBlocksPct:freeFragments:freeFragmentsPct:maxDiskSize:
mmdf:poolTotal:0:1:::data:3647452792832:475595343872:13:5247437:0:16106127360:
";

const MMCES_OUTPUT: &str = "\
mmcesstate::HEADER:version:reserved:reserved:NODE:AUTH:BLOCK:NETWORK:AUTH_OBJ:NFS:OBJ:SMB:CES:
mmcesstate::0:1:::ces01:DISABLED:DISABLED:HEALTHY:DISABLED:DEGRADED:DISABLED:HEALTHY:HEALTHY:
";

const MMREPQUOTA_OUTPUT: &str = "\
mmrepquota::HEADER:version:reserved:reserved:filesystemName:quotaType:id:name:blockUsage:blockQuota:blockLimit:blockInDoubt:blockGrace:filesUsage:filesQuota:filesLimit:filesInDoubt:filesGrace:remarks:quota:defQuota:fid:filesetname:
mmrepquota::0:1:::project:FILESET:1:apps:337419744:536870912:644245094:163840:none:1512427:0:0:8:none:e:on:off:1:apps:
";

const MMDIAG_WAITERS_OUTPUT: &str = "\
mmdiag:waiters:HEADER:version:reserved:reserved:threadId:threadAddr:threadName:waitStartTime:waitTime:isMonitored:condVarAddr:condVarName:condVarReason:mutexAddr:mutexName:auxReason:delayTime:delayReason:
mmdiag:waiters:0:1:::1024:0000000000000000:RebuildWorkThread:Fri Jan 10 2020:0.5:monitored:::::::data%20write:::
mmdiag:waiters:0:1:::1025:0000000000000000:RebuildWorkThread:Fri Jan 10 2020:3.0:monitored:::::::data%20write:::
mmdiag:waiters:0:1:::1026:0000000000000000:SGExceptionLogBufferFullThread:Fri Jan 10 2020:30.0:monitored:::::::log%20wrap:::
";

fn base_config() -> Config {
    let mut config = Config::default();
    config.mmdf_filesystems = Some(vec!["project".to_string()]);
    config
}

#[tokio::test]
async fn capacity_scrape_scales_kilobytes_exactly() {
    let mut config = base_config();
    config.enable_only(&["mmdf"]);
    let runner = MockRunner::new().with_output("/usr/lpp/mmfs/bin/mmdf project -Y", MMDF_OUTPUT);
    let exporter = Exporter::from_config(&config, Arc::new(runner));
    let registry = exporter.gather().await.unwrap();

    assert_eq!(
        sample_value(&registry, "gpfs_fs_size_bytes", &[("fs", "project")]),
        Some(3749557989015552.0)
    );
    assert_eq!(
        sample_value(&registry, "gpfs_fs_free_bytes", &[("fs", "project")]),
        Some(492750870413312.0)
    );
    assert_eq!(
        sample_value(&registry, "gpfs_fs_used_inodes", &[("fs", "project")]),
        Some(430741822.0)
    );

    // The scaled values survive text encoding without float distortion.
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer).unwrap();
    let text = String::from_utf8(buffer).unwrap();
    assert!(text.contains("gpfs_fs_size_bytes{fs=\"project\"} 3749557989015552"));
}

#[tokio::test]
async fn ces_states_enumerate_per_service() {
    let mut config = base_config();
    config.enable_only(&["mmces"]);
    config.mmces_nodename = "ces01".to_string();
    let runner =
        MockRunner::new().with_output("/usr/lpp/mmfs/bin/mmces state show -N ces01 -Y", MMCES_OUTPUT);
    let exporter = Exporter::from_config(&config, Arc::new(runner));
    let registry = exporter.gather().await.unwrap();

    assert_eq!(
        sample_value(
            &registry,
            "gpfs_ces_state",
            &[("service", "NFS"), ("state", "DEGRADED")]
        ),
        Some(1.0)
    );
    assert_eq!(
        sample_value(
            &registry,
            "gpfs_ces_state",
            &[("service", "NFS"), ("state", "HEALTHY")]
        ),
        Some(0.0)
    );
    assert_eq!(
        sample_value(
            &registry,
            "gpfs_ces_state",
            &[("service", "NFS"), ("state", "UNKNOWN")]
        ),
        Some(0.0)
    );
}

#[tokio::test]
async fn quota_blocks_convert_to_bytes() {
    let mut config = base_config();
    config.enable_only(&["mmrepquota"]);
    let runner =
        MockRunner::new().with_output("/usr/lpp/mmfs/bin/mmrepquota -j -Y -a", MMREPQUOTA_OUTPUT);
    let exporter = Exporter::from_config(&config, Arc::new(runner));
    let registry = exporter.gather().await.unwrap();

    let labels = &[("fs", "project"), ("fileset", "apps")];
    assert_eq!(
        sample_value(&registry, "gpfs_fileset_used_bytes", labels),
        Some(345517817856.0)
    );
    assert_eq!(
        sample_value(&registry, "gpfs_fileset_in_doubt_bytes", labels),
        Some(167772160.0)
    );
}

#[tokio::test]
async fn waiter_histogram_uses_configured_buckets() {
    let mut config = base_config();
    config.enable_only(&["mmdiag"]);
    config.waiter_buckets = vec![1.0, 5.0, 3600.0];
    let runner = MockRunner::new()
        .with_output("/usr/lpp/mmfs/bin/mmdiag --waiters -Y", MMDIAG_WAITERS_OUTPUT);
    let exporter = Exporter::from_config(&config, Arc::new(runner));
    let registry = exporter.gather().await.unwrap();

    let (count, buckets) =
        histogram_buckets(&registry, "gpfs_mmdiag_waiter_seconds", &[]).unwrap();
    assert_eq!(count, 3);
    assert_eq!(buckets, vec![(1.0, 1), (5.0, 2), (3600.0, 3)]);
}

#[tokio::test(start_paused = true)]
async fn slow_command_hits_deadline_without_failing_scrape() {
    let mut config = base_config();
    config.enable_only(&["mmgetstate", "mmdf"]);
    config.mmgetstate_timeout = Duration::from_secs(1);
    let runner = MockRunner::new()
        .with_delayed_output(
            "/usr/lpp/mmfs/bin/mmgetstate -Y",
            MMGETSTATE_OUTPUT,
            Duration::from_secs(30),
        )
        .with_output("/usr/lpp/mmfs/bin/mmdf project -Y", MMDF_OUTPUT);
    let exporter = Exporter::from_config(&config, Arc::new(runner));
    let registry = exporter.gather().await.unwrap();

    assert_eq!(
        sample_value(
            &registry,
            "gpfs_exporter_collect_timeout",
            &[("collector", "mmgetstate")]
        ),
        Some(1.0)
    );
    assert_eq!(
        sample_value(
            &registry,
            "gpfs_exporter_collect_error",
            &[("collector", "mmgetstate")]
        ),
        Some(0.0)
    );
    // The healthy collector still reports in the same scrape.
    assert_eq!(
        sample_value(&registry, "gpfs_fs_size_bytes", &[("fs", "project")]),
        Some(3749557989015552.0)
    );
    assert_eq!(
        sample_value(&registry, "gpfs_mmgetstate_state", &[("state", "active")]),
        None
    );
}

#[tokio::test]
async fn cache_serves_last_good_scrape_on_failure() {
    let mut config = base_config();
    config.enable_only(&["mmgetstate"]);
    config.use_cache = true;

    let runner = Arc::new(
        MockRunner::new().with_output("/usr/lpp/mmfs/bin/mmgetstate -Y", MMGETSTATE_OUTPUT),
    );
    let exporter = Exporter::from_config(&config, runner.clone());
    let registry = exporter.gather().await.unwrap();
    assert_eq!(
        sample_value(&registry, "gpfs_mmgetstate_state", &[("state", "active")]),
        Some(1.0)
    );

    // Next scrape fails: stale data is served alongside the error flag.
    runner.replace_with_failure("/usr/lpp/mmfs/bin/mmgetstate -Y");
    let registry = exporter.gather().await.unwrap();
    assert_eq!(
        sample_value(&registry, "gpfs_mmgetstate_state", &[("state", "active")]),
        Some(1.0)
    );
    assert_eq!(
        sample_value(
            &registry,
            "gpfs_exporter_collect_error",
            &[("collector", "mmgetstate")]
        ),
        Some(1.0)
    );
}
