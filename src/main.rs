use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use importd::config::{CacheConfig, ImportConfig};
use importd::error::ImportError;
use importd::scheduler::{
    run_reclaim_sweeper, CodeImportSourceDetails, JobStore, RepositoryType, Scheduler,
};
use importd::store::{BranchStore, ForeignTreeStore};
use importd::worker::{ImportWorker, WorkerRunner};

#[derive(Parser, Debug)]
#[command(name = "importd")]
#[command(version)]
#[command(about = "Imports foreign version-control repositories into hosted branches")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the import daemon: schedule registered imports across worker
    /// slots until shut down
    Daemon(DaemonArgs),

    /// Run a single import directly, without a scheduler
    Once(OnceArgs),
}

#[derive(Parser, Debug)]
struct DaemonArgs {
    /// Machine name used for job ownership; defaults to $HOSTNAME
    #[arg(long)]
    hostname: Option<String>,

    /// Directory for the foreign tree and branch caches
    #[arg(long, default_value = "/var/cache/importd")]
    cache_root: PathBuf,

    /// JSON file with an array of import source details to register at
    /// startup
    #[arg(long)]
    imports_file: Option<PathBuf>,

    /// Maximum claim/run cycles before a job is permanently failed
    #[arg(long, default_value = "5")]
    max_attempts: u32,

    /// Number of concurrent worker slots in this process
    #[arg(long, default_value = "1")]
    slots: usize,

    /// Seconds an idle worker waits before polling again
    #[arg(long, default_value = "5")]
    poll_interval_secs: u64,

    /// Seconds between worker heartbeats
    #[arg(long, default_value = "10")]
    heartbeat_secs: u64,

    /// Seconds without a heartbeat before a job is reclaimed
    #[arg(long, default_value = "60")]
    reclaim_secs: u64,

    /// Seconds between reclaim/eviction sweeps
    #[arg(long, default_value = "30")]
    sweep_secs: u64,

    /// Seconds a terminal job's cached tree is retained
    #[arg(long, default_value = "86400")]
    tree_retention_secs: u64,
}

#[derive(Parser, Debug)]
struct OnceArgs {
    /// Foreign repository type: cvs, svn, git or bzr
    repository_type: String,

    /// Location of the foreign repository
    source_url: String,

    /// Identity of the destination hosted branch
    target_branch_id: String,

    /// File to append worker progress output to
    log_file: Option<PathBuf>,

    /// Directory for the foreign tree and branch caches
    #[arg(long, default_value = "/var/cache/importd")]
    cache_root: PathBuf,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn default_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "import-worker".to_string())
}

/// Token cancelled on SIGINT or SIGTERM. Worker slots finish at their next
/// pipeline checkpoint and the sweepers stop at their next tick, so a
/// signalled daemon drains instead of dying mid-publish.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let sigterm = async {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Can't listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm => {}
        }
        tracing::info!("Shutdown requested, draining import workers");
        trigger.cancel();
    });

    token
}

fn parse_repository_type(raw: &str) -> RepositoryType {
    match raw.parse::<RepositoryType>() {
        Ok(kind) => kind,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

async fn register_imports(store: &JobStore, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let raw = tokio::fs::read(path).await?;
    let imports: Vec<CodeImportSourceDetails> = serde_json::from_slice(&raw)?;
    for source in imports {
        let target = source.target_branch_id.clone();
        match store.enqueue(source).await {
            Ok(job_id) => {
                tracing::info!(job_id = %job_id, target = %target, "Registered import");
            }
            Err(ImportError::DuplicateJob(_)) => {
                tracing::warn!(target = %target, "Skipping duplicate import registration");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Periodically drop cached foreign trees for terminal jobs.
async fn run_eviction_sweeper(
    store: Arc<JobStore>,
    trees: Arc<ForeignTreeStore>,
    retention: Duration,
    sweep_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(sweep_interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let terminal: HashSet<Uuid> = store.terminal_job_ids().await.into_iter().collect();
                match trees.evict(retention, |id| terminal.contains(&id)).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(evicted = n, "Evicted cached foreign trees"),
                    Err(e) => tracing::warn!(error = %e, "Tree cache eviction failed"),
                }
            }
        }
    }
}

async fn run_daemon(args: DaemonArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ImportConfig {
        hostname: args.hostname.unwrap_or_else(default_hostname),
        max_attempts: args.max_attempts,
        heartbeat_interval: Duration::from_secs(args.heartbeat_secs),
        reclaim_deadline: Duration::from_secs(args.reclaim_secs),
        reclaim_sweep_interval: Duration::from_secs(args.sweep_secs),
        poll_interval: Duration::from_secs(args.poll_interval_secs),
        worker_slots: args.slots.max(1),
        cache: CacheConfig {
            tree_root: args.cache_root.join("trees"),
            branch_root: args.cache_root.join("branches"),
            tree_retention: Duration::from_secs(args.tree_retention_secs),
        },
    };

    tracing::info!(
        hostname = %config.hostname,
        slots = config.worker_slots,
        max_attempts = config.max_attempts,
        cache = %args.cache_root.display(),
        "Starting import daemon"
    );

    let store = Arc::new(JobStore::new(config.max_attempts));
    if let Some(path) = &args.imports_file {
        register_imports(&store, path).await?;
    }

    let scheduler = Arc::new(Scheduler::new(store.clone()));
    let trees = Arc::new(ForeignTreeStore::new(config.cache.tree_root.clone()));
    let branches = Arc::new(BranchStore::new(config.cache.branch_root.clone()));
    let worker = Arc::new(ImportWorker::new(trees.clone(), branches));

    let shutdown = shutdown_token();

    tokio::spawn(run_reclaim_sweeper(
        store.clone(),
        config.reclaim_deadline,
        config.reclaim_sweep_interval,
        shutdown.clone(),
    ));
    tokio::spawn(run_eviction_sweeper(
        store.clone(),
        trees,
        config.cache.tree_retention,
        config.reclaim_sweep_interval,
        shutdown.clone(),
    ));

    let mut runners = Vec::new();
    for slot in 0..config.worker_slots {
        let runner = WorkerRunner::new(
            format!("{}/{}", config.hostname, slot),
            store.clone(),
            scheduler.clone(),
            worker.clone(),
            config.poll_interval,
            config.heartbeat_interval,
        );
        let token = shutdown.clone();
        runners.push(tokio::spawn(async move { runner.run(token).await }));
    }

    for handle in runners {
        let _ = handle.await;
    }
    tracing::info!("Import daemon stopped");
    Ok(())
}

async fn run_once(args: OnceArgs) -> Result<(), Box<dyn std::error::Error>> {
    let source = CodeImportSourceDetails {
        repository_type: parse_repository_type(&args.repository_type),
        source_url: args.source_url,
        target_branch_id: args.target_branch_id,
        log_destination: args.log_file,
    };

    let trees = Arc::new(ForeignTreeStore::new(args.cache_root.join("trees")));
    let branches = Arc::new(BranchStore::new(args.cache_root.join("branches")));
    let worker = ImportWorker::new(trees, branches);

    let shutdown = shutdown_token();
    // A stable id keeps repeated manual runs on the incremental-update path
    // instead of a fresh checkout every time.
    let outcome = worker.run(source.stable_job_id(), &source, &shutdown).await;

    match args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        OutputFormat::Table => {
            if outcome.success {
                println!("Import succeeded");
                println!("Revisions imported: {}", outcome.revisions_imported);
            } else {
                println!("Import failed");
                if let Some(detail) = &outcome.error_detail {
                    println!("Category: {}", detail.category);
                    println!("Error:    {}", detail.message);
                }
            }
        }
    }

    if !outcome.success {
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    match args.command {
        Commands::Daemon(daemon_args) => run_daemon(daemon_args).await?,
        Commands::Once(once_args) => run_once(once_args).await?,
    }
    Ok(())
}
