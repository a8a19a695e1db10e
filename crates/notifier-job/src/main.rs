//! # notifier
//!
//! Sends the day's birthday greetings to one chat and exits.

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use notifier_core::{RecordSource, SessionStore, Transport};
use notifier_job::{Config, NotificationJob, run_date};
use notifier_records::PgRecordSource;
use notifier_session::{
    SessionPersister,
    storage::{BucketSessionStore, MemorySessionStore},
};
use notifier_transport::{BridgeConfig, BridgeTransport, LaunchOptions, LoopbackTransport};

/// Daily birthday notifier
#[derive(Parser)]
#[command(name = "notifier")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: notifier.toml)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send today's greetings
    Run {
        /// Run for another month/day instead of today
        #[arg(long, value_name = "MM-DD")]
        date: Option<String>,

        /// Query records but send through an in-process transport
        #[arg(long)]
        dry_run: bool,
    },
    /// Stored session management
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Show whether a session is stored
    Status,
    /// Delete the stored session, forcing a fresh login
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Run { date, dry_run } => run(&config, date.as_deref(), dry_run).await,
        Commands::Session { action } => session(&config, action).await,
    }
}

fn session_store(config: &Config) -> anyhow::Result<BucketSessionStore> {
    let (url, key) = config.storage_credentials()?;
    let store = BucketSessionStore::new(url, key, &config.session.bucket);
    Ok(match &config.session.scratch_dir {
        Some(dir) => store.with_scratch_dir(dir),
        None => store,
    })
}

async fn run(config: &Config, date: Option<&str>, dry_run: bool) -> anyhow::Result<()> {
    let date = run_date(config.today(), date)?;
    tracing::info!(%date, dry_run, "Starting notification run");

    let records: Arc<dyn RecordSource> = Arc::new(
        PgRecordSource::connect(config.database_url()?, &config.records.table)
            .await
            .context("connecting to record datastore")?,
    );

    let store: Arc<dyn SessionStore> = if dry_run {
        Arc::new(MemorySessionStore::new())
    } else {
        Arc::new(session_store(config)?)
    };
    let persister = SessionPersister::new(store, &config.session.id);
    let mut job = NotificationJob::new(config.job_settings(), persister, records);

    let report = if dry_run {
        job.run(date, |session| async move {
            Ok(Arc::new(LoopbackTransport::start(session)) as Arc<dyn Transport>)
        })
        .await?
    } else {
        let bridge = BridgeConfig {
            url: config.bridge.url.clone(),
            launch: LaunchOptions {
                executable_path: config.bridge.executable_path.clone(),
                args: config.bridge.args.clone(),
            },
            resolve_launch: config.bridge.resolve_executable,
            request_timeout: Duration::from_secs(config.bridge.request_timeout_secs),
        };
        job.run(date, |session| async move {
            Ok(Arc::new(BridgeTransport::connect(bridge, session).await?) as Arc<dyn Transport>)
        })
        .await?
    };

    if report.failed > 0 || report.timed_out > 0 {
        tracing::warn!(
            failed = report.failed,
            timed_out = report.timed_out,
            "Some greetings were not confirmed"
        );
    }
    Ok(())
}

async fn session(config: &Config, action: SessionAction) -> anyhow::Result<()> {
    let store = session_store(config)?;
    let id = config.session.id.as_str();

    match action {
        SessionAction::Status => {
            if store.exists(id).await? {
                let size = store.extract(id).await?.map_or(0, |blob| blob.len());
                println!(
                    "Session {id:?} stored as {} ({size} bytes)",
                    BucketSessionStore::object_name(id)
                );
            } else {
                println!("No session stored for {id:?}");
            }
        }
        SessionAction::Clear => {
            store.delete(id).await?;
            println!("Session {id:?} cleared");
        }
    }
    Ok(())
}
