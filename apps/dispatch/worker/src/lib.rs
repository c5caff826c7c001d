//! Dispatch Worker Service
//!
//! Command-line front end for the job dispatcher.
//!
//! ## Architecture
//!
//! ```text
//! submit ──RPUSH──> Redis list <group>/<name> ──BLPOP──> Dispatcher
//!    │                                                      │
//!    └──HINCRBY +1──> <group>/workerCountMap <──HINCRBY -1──┘
//! ```
//!
//! ## Commands
//!
//! - `run`: start a worker on `QUEUE_GROUP/QUEUE_NAME`
//! - `submit`: enqueue one job
//! - `remove`: drop queued jobs across the group by name and argument value
//! - `stats`: print the group's outstanding counters

mod handlers;

use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use job_dispatcher::{
    init_metrics, CallbackQueueSink, Dispatcher, DispatcherConfig, QueueAdmin, QueueIdentity,
    QueueStore, RedisStore, Submitter,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "dispatch-worker")]
#[command(about = "Run job dispatch workers and manage their queues")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start a worker on the configured queue
    Run {
        /// Record job outcomes on the queue's callback list
        #[arg(long)]
        callbacks: bool,
    },

    /// Enqueue a job
    Submit {
        /// Job name
        name: String,

        /// Job arguments as JSON
        #[arg(default_value = "null")]
        args: String,

        /// Target queue inside the group (defaults to QUEUE_NAME)
        #[arg(short, long)]
        queue: Option<String>,
    },

    /// Remove queued jobs whose argument at PATH equals VALUE
    Remove {
        /// Job name
        name: String,

        /// Dotted path inside the job arguments
        path: String,

        /// Value to match
        value: String,
    },

    /// Show outstanding counters for the group
    Stats,
}

/// Run the command line.
///
/// # Errors
///
/// Returns an error if:
/// - the configuration is invalid
/// - Redis is unreachable at startup
/// - the chosen command fails
pub async fn run() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = DispatcherConfig::from_env().wrap_err("Failed to load dispatcher configuration")?;

    info!(redis_url = %config.redis_url, "Connecting to Redis...");
    let store = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .wrap_err("Failed to connect to Redis")?,
    );

    execute(cli.command, config, store).await
}

async fn execute(command: Commands, config: DispatcherConfig, store: Arc<RedisStore>) -> Result<()> {
    match command {
        Commands::Run { callbacks } => run_worker(config, store, callbacks).await,

        Commands::Submit { name, args, queue } => {
            let args: serde_json::Value =
                serde_json::from_str(&args).wrap_err("Job arguments must be valid JSON")?;

            let submitter = match queue {
                Some(queue) => Submitter::for_queue(store, QueueIdentity::new(&config.queue_group, queue))
                    .with_suppress_counter(config.suppress_counter),
                None => Submitter::new(store, &config),
            };
            submitter
                .submit(&name, &args)
                .await
                .wrap_err("Failed to submit job")?;

            info!(queue = %submitter.queue(), job = %name, "Job submitted");
            Ok(())
        }

        Commands::Remove { name, path, value } => {
            let admin = QueueAdmin::new(store, config.queue());
            let removed = admin
                .remove(&name, &path, &value)
                .await
                .wrap_err("Failed to remove jobs")?;

            println!("{}", removed);
            Ok(())
        }

        Commands::Stats => {
            let admin = QueueAdmin::new(store, config.queue());
            let counters = admin.counters().await.wrap_err("Failed to read counters")?;

            println!("{}", serde_json::to_string_pretty(&counters)?);
            Ok(())
        }
    }
}

async fn run_worker(config: DispatcherConfig, store: Arc<RedisStore>, callbacks: bool) -> Result<()> {
    if let Some(addr) = metrics_addr()? {
        init_metrics(addr).wrap_err("Failed to start metrics exporter")?;
    }

    info!(
        queue = %config.queue(),
        worker_id = %config.worker_id,
        concurrency = config.concurrency,
        pop_timeout_ms = config.pop_timeout.as_millis() as u64,
        "Worker configuration loaded"
    );

    let queue = config.queue();
    let store: Arc<dyn QueueStore> = store;
    let mut dispatcher = Dispatcher::new(store.clone(), config);
    if callbacks {
        dispatcher = dispatcher.with_status_sink(Arc::new(CallbackQueueSink::new(store, &queue)));
    }
    dispatcher.register_batch(handlers::builtin());

    tokio::select! {
        result = dispatcher.run() => {
            result.wrap_err("Dispatcher stopped")?;
        }
        result = shutdown_signal() => {
            if let Err(e) = result {
                error!("Error waiting for shutdown signal: {}", e);
            }
        }
    }

    info!("Dispatch worker stopped");
    Ok(())
}

fn metrics_addr() -> Result<Option<SocketAddr>> {
    match std::env::var("METRICS_ADDR") {
        Ok(raw) if !raw.trim().is_empty() => {
            let addr = raw
                .trim()
                .parse()
                .wrap_err_with(|| format!("Invalid METRICS_ADDR '{}'", raw))?;
            Ok(Some(addr))
        }
        _ => Ok(None),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let is_prod = std::env::var("APP_ENV")
        .map(|e| e.eq_ignore_ascii_case("production"))
        .unwrap_or(false);

    if is_prod {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(false).flatten_event(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .init();
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .wrap_err("Failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = ctrl_c => {
            result.wrap_err("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
