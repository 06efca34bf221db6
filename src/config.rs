use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the on-disk caches kept between import runs.
///
/// Both caches are safely discardable: a wiped foreign tree cache only costs
/// a full re-checkout on the next run, and the branch store re-creates a
/// branch file on the next successful publish.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory for materialized foreign checkouts, one subdirectory
    /// per job id.
    pub tree_root: PathBuf,
    /// Root directory for converted hosted branches, one file per target
    /// branch id.
    pub branch_root: PathBuf,
    /// How long a terminal job's foreign tree is kept before eviction.
    pub tree_retention: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tree_root: PathBuf::from("/var/cache/importd/trees"),
            branch_root: PathBuf::from("/var/cache/importd/branches"),
            tree_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Configuration for one import daemon process.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Machine name reported to the scheduler; ownership checks compare
    /// against this string.
    pub hostname: String,
    /// Maximum claim/run cycles before a job is permanently failed.
    pub max_attempts: u32,
    /// How often a running worker refreshes its heartbeat.
    pub heartbeat_interval: Duration,
    /// A job whose heartbeat is older than this is presumed dead and
    /// reclaimed.
    pub reclaim_deadline: Duration,
    /// How often the reclaim sweep runs.
    pub reclaim_sweep_interval: Duration,
    /// How long an idle worker waits before polling the scheduler again.
    pub poll_interval: Duration,
    /// Number of concurrent worker slots in this process. Each slot claims
    /// at most one job at a time.
    pub worker_slots: usize,
    pub cache: CacheConfig,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            hostname: "import-worker".to_string(),
            max_attempts: 5,
            heartbeat_interval: Duration::from_secs(10),
            reclaim_deadline: Duration::from_secs(60),
            reclaim_sweep_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
            worker_slots: 1,
            cache: CacheConfig::default(),
        }
    }
}
