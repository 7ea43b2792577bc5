//! leasehold: lease broker for panel-hosted servers
//!
//! Runs the background scheduler (`serve`) and exposes every lease and pool
//! operation as a subcommand.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use leasehold_broker::archive::{AnyTransport, BackupArchiver};
use leasehold_broker::BrokerError;
use leasehold_broker::clock::SystemClock;
use leasehold_broker::config::{
    ArchiveBackend, ArchiveConfig, BrokerConfig, LeaseConfig, PanelConfig, PollSettings,
    SchedulerConfig,
};
use leasehold_broker::lease::{LeaseRequest, LeaseService, ReturnOptions};
use leasehold_broker::notify::TracingNotifier;
use leasehold_broker::remote::PanelClient;
use leasehold_broker::scheduler::lease_tasks;
use leasehold_broker::state::{self, DbPool, PrincipalId};
use leasehold_common::LeaseStatus;
use leasehold_common::defaults::{
    DEFAULT_ARCHIVE_PREFIX, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_POWER_TIMEOUT_SECS,
    DEFAULT_REINSTALL_TIMEOUT_SECS, DEFAULT_REMINDER_WINDOW_HOURS, DEFAULT_SCHEDULER_TICK_SECS,
    DEFAULT_SNAPSHOT_TIMEOUT_SECS, MAX_LEASE_DURATION_DAYS,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

type Service = LeaseService<PanelClient, AnyTransport>;

#[derive(Parser, Debug)]
#[command(name = "leasehold")]
#[command(about = "Lease broker for panel-hosted servers")]
#[command(version)]
struct Args {
    #[command(flatten)]
    broker: BrokerArgs,

    #[command(subcommand)]
    command: Command,
}

/// Connection and policy settings shared by every command
#[derive(clap::Args, Debug)]
struct BrokerArgs {
    /// State database path (default: per-user data directory)
    #[arg(long, global = true, env = "LEASEHOLD_DB")]
    db: Option<PathBuf>,

    /// Panel base URL
    #[arg(long, global = true, env = "LEASEHOLD_PANEL_URL")]
    panel_url: Option<String>,

    /// Panel client API key
    #[arg(long, global = true, env = "LEASEHOLD_PANEL_API_KEY", hide_env_values = true)]
    panel_api_key: Option<String>,

    /// Per-request HTTP timeout in seconds
    #[arg(long, global = true, default_value_t = 30)]
    request_timeout: u64,

    /// Seconds between completion probes
    #[arg(long, global = true, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    poll_interval: u64,

    /// Power signal timeout in seconds
    #[arg(long, global = true, default_value_t = DEFAULT_POWER_TIMEOUT_SECS)]
    power_timeout: u64,

    /// Reinstall timeout in seconds
    #[arg(long, global = true, default_value_t = DEFAULT_REINSTALL_TIMEOUT_SECS)]
    reinstall_timeout: u64,

    /// Snapshot timeout in seconds
    #[arg(long, global = true, default_value_t = DEFAULT_SNAPSHOT_TIMEOUT_SECS)]
    snapshot_timeout: u64,

    /// Archive into this directory instead of S3
    #[arg(long, global = true, env = "LEASEHOLD_ARCHIVE_DIR")]
    archive_dir: Option<PathBuf>,

    /// S3 bucket for archived snapshots
    #[arg(long, global = true, env = "LEASEHOLD_ARCHIVE_BUCKET", default_value = "")]
    archive_bucket: String,

    /// Key prefix inside the bucket
    #[arg(long, global = true, env = "LEASEHOLD_ARCHIVE_PREFIX", default_value = DEFAULT_ARCHIVE_PREFIX)]
    archive_prefix: String,

    /// AWS region of the bucket
    #[arg(long, global = true, env = "LEASEHOLD_ARCHIVE_REGION", default_value = "us-east-2")]
    archive_region: String,

    /// Scratch directory for snapshot downloads (default: system temp dir)
    #[arg(long, global = true, env = "LEASEHOLD_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Container image applied when provisioning
    #[arg(long, global = true, env = "LEASEHOLD_CONTAINER_IMAGE")]
    container_image: Option<String>,

    /// Longest lease duration accepted, in days
    #[arg(long, global = true, default_value_t = MAX_LEASE_DURATION_DAYS)]
    max_duration_days: i64,

    /// Scheduler tick in seconds
    #[arg(long, global = true, default_value_t = DEFAULT_SCHEDULER_TICK_SECS)]
    tick: u64,

    /// Remind owners this many hours before a lease ends
    #[arg(long, global = true, default_value_t = DEFAULT_REMINDER_WINDOW_HOURS)]
    reminder_hours: i64,

    /// Return overdue leases automatically
    #[arg(long, global = true, env = "LEASEHOLD_AUTO_RETURN")]
    auto_return: bool,
}

impl From<BrokerArgs> for BrokerConfig {
    fn from(args: BrokerArgs) -> Self {
        let backend = match args.archive_dir {
            Some(root) => ArchiveBackend::Directory { root },
            None => ArchiveBackend::S3 {
                bucket: args.archive_bucket,
                prefix: args.archive_prefix,
                region: args.archive_region,
            },
        };

        Self {
            panel: PanelConfig {
                base_url: args.panel_url.unwrap_or_default(),
                api_key: args.panel_api_key.unwrap_or_default(),
                request_timeout: Duration::from_secs(args.request_timeout),
                polling: PollSettings {
                    interval: Duration::from_secs(args.poll_interval),
                    power_timeout: Duration::from_secs(args.power_timeout),
                    reinstall_timeout: Duration::from_secs(args.reinstall_timeout),
                    snapshot_timeout: Duration::from_secs(args.snapshot_timeout),
                },
            },
            archive: ArchiveConfig {
                backend,
                scratch_dir: args.scratch_dir,
            },
            lease: LeaseConfig {
                container_image: args.container_image,
                max_duration_days: args.max_duration_days,
            },
            scheduler: SchedulerConfig {
                tick: Duration::from_secs(args.tick),
                reminder_window: chrono::Duration::hours(args.reminder_hours),
                auto_return: args.auto_return,
            },
            db_path: args.db,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the reminder and overdue scheduler until interrupted
    Serve,

    /// Run every scheduled task once and exit
    Tick,

    /// Manage leases
    #[command(subcommand)]
    Lease(LeaseCommand),

    /// Manage the server pool
    #[command(subcommand)]
    Resource(ResourceCommand),
}

#[derive(Subcommand, Debug)]
enum LeaseCommand {
    /// Request a new lease
    Create {
        /// Lease name
        #[arg(long)]
        name: String,

        /// Requested length in days
        #[arg(long)]
        days: i64,

        /// Date of the event the lease is for (YYYY-MM-DD)
        #[arg(long)]
        event_date: NaiveDate,

        /// Requesting user id
        #[arg(long)]
        requester: String,

        /// Owning user id (default: the requester)
        #[arg(long)]
        owner: Option<String>,

        /// Collaborator user id (repeatable)
        #[arg(long = "collaborator", required = true)]
        collaborators: Vec<String>,

        /// Server version, MAJOR.MINOR[.PATCH]
        #[arg(long)]
        version: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Approve a pending lease and provision a server for it
    Approve {
        id: i64,

        /// Skip power-off, version/image and reinstall
        #[arg(long)]
        skip_reset: bool,
    },

    /// Reject a pending lease
    Reject { id: i64 },

    /// Set a lease's duration in days
    Extend { id: i64, days: i64 },

    /// Archive, wipe and release an active lease's server
    Return {
        id: i64,

        #[arg(long)]
        skip_archive: bool,

        #[arg(long)]
        skip_reset: bool,
    },

    /// List leases
    List {
        /// Only leases in this status
        #[arg(long)]
        status: Option<LeaseStatus>,
    },

    /// Show one lease
    Show { id: i64 },
}

#[derive(Subcommand, Debug)]
enum ResourceCommand {
    /// Add a server to the pool
    Add { alias: String, physical_id: String },

    /// Remove a server from the pool
    Remove { alias: String },

    /// List the pool with current holders
    List,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    let retryable = e
        .chain()
        .find_map(|cause| cause.downcast_ref::<BrokerError>())
        .is_some_and(BrokerError::is_retryable);
    if retryable {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mNothing was changed; the same command can be retried\x1b[0m"
        );
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = BrokerConfig::from(args.broker);
    let db = state::open_db(config.db_path.as_deref()).await?;

    match args.command {
        Command::Serve => serve(&config, db).await?,
        Command::Tick => {
            let service = Arc::new(build_service(&config, db).await?);
            let mut scheduler = lease_tasks(service, &config.scheduler);
            let report = scheduler.run_due_tasks(chrono::Utc::now()).await;
            info!(
                succeeded = ?report.succeeded,
                failed = ?report.failed,
                "Scheduled tasks finished"
            );
            if !report.failed.is_empty() {
                anyhow::bail!("{} scheduled task(s) failed", report.failed.len());
            }
        }
        Command::Lease(command) => handle_lease(command, &config, db).await?,
        Command::Resource(command) => handle_resource(command, db).await?,
    }

    Ok(())
}

async fn build_service(config: &BrokerConfig, db: DbPool) -> Result<Service> {
    config.validate().context("Invalid configuration")?;

    let remote = Arc::new(PanelClient::new(&config.panel)?);
    let transport = Arc::new(AnyTransport::from_config(&config.archive).await);

    let mut archiver = BackupArchiver::new(Arc::clone(&remote), transport);
    if let Some(dir) = &config.archive.scratch_dir {
        archiver = archiver.with_scratch_dir(dir);
    }

    Ok(LeaseService::new(
        db,
        remote,
        archiver,
        Arc::new(TracingNotifier),
        Arc::new(SystemClock),
        config.lease.clone(),
    ))
}

async fn serve(config: &BrokerConfig, db: DbPool) -> Result<()> {
    let service = Arc::new(build_service(config, db).await?);
    let scheduler = lease_tasks(service, &config.scheduler);

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run(config.scheduler.tick, cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for interrupt")?;
    info!("Interrupt received, stopping scheduler");

    cancel.cancel();
    handle.await.context("Scheduler task panicked")?;
    Ok(())
}

async fn print_leases(db: &DbPool, leases: &[state::Lease]) -> Result<()> {
    if leases.is_empty() {
        println!("No leases found.");
        return Ok(());
    }
    let resources = state::list_resources(db).await?;
    println!("{}", state::lease_table(leases, &resources));
    Ok(())
}

async fn handle_lease(command: LeaseCommand, config: &BrokerConfig, db: DbPool) -> Result<()> {
    match command {
        LeaseCommand::List { status } => {
            let leases = match status {
                Some(status) => state::leases_by_status(&db, status).await?,
                None => state::list_leases(&db).await?,
            };
            print_leases(&db, &leases).await
        }

        LeaseCommand::Show { id } => {
            let lease = state::get_lease(&db, id)
                .await?
                .with_context(|| format!("Lease {id} not found"))?;
            print_leases(&db, std::slice::from_ref(&lease)).await
        }

        LeaseCommand::Create {
            name,
            days,
            event_date,
            requester,
            owner,
            collaborators,
            version,
            description,
        } => {
            let service = build_service(config, db.clone()).await?;
            let requester = PrincipalId::new(requester);
            let owner = owner.map(PrincipalId::new).unwrap_or_else(|| requester.clone());
            let request = LeaseRequest {
                name,
                duration_days: days,
                event_date,
                version_tag: version,
                description,
                collaborators,
            };

            let lease = service.create(&requester, &owner, &request).await?;
            print_leases(&db, &[lease]).await
        }

        LeaseCommand::Approve { id, skip_reset } => {
            let service = build_service(config, db.clone()).await?;
            let lease = service.approve(id, skip_reset).await?;
            print_leases(&db, &[lease]).await
        }

        LeaseCommand::Reject { id } => {
            let service = build_service(config, db.clone()).await?;
            let lease = service.reject(id).await?;
            print_leases(&db, &[lease]).await
        }

        LeaseCommand::Extend { id, days } => {
            let service = build_service(config, db.clone()).await?;
            let lease = service.extend(id, days).await?;
            print_leases(&db, &[lease]).await
        }

        LeaseCommand::Return {
            id,
            skip_archive,
            skip_reset,
        } => {
            let service = build_service(config, db.clone()).await?;
            let outcome = service
                .initiate_return(
                    id,
                    ReturnOptions {
                        skip_archive,
                        skip_reset,
                    },
                )
                .await?;

            if let Some(report) = &outcome.archive {
                println!("Archived to {}:", report.folder);
                for location in &report.uploaded {
                    println!("  {location}");
                }
                if !report.skipped.is_empty() {
                    println!("Skipped {} incomplete held snapshot(s)", report.skipped.len());
                }
            }
            print_leases(&db, &[outcome.lease]).await
        }
    }
}

async fn handle_resource(command: ResourceCommand, db: DbPool) -> Result<()> {
    let allocator = leasehold_broker::allocator::Allocator::new(db.clone());

    match command {
        ResourceCommand::Add { alias, physical_id } => {
            let resource = allocator.add(&alias, &physical_id).await?;
            println!("Added {} ({})", resource.alias, resource.physical_id);
        }
        ResourceCommand::Remove { alias } => {
            allocator.remove(&alias).await?;
            println!("Removed {alias}");
        }
        ResourceCommand::List => {
            let resources = allocator.list().await?;
            if resources.is_empty() {
                println!("Pool is empty.");
                return Ok(());
            }
            let active = state::leases_by_status(&db, LeaseStatus::Active).await?;
            println!("{}", state::resource_table(&resources, &active));
        }
    }

    Ok(())
}
