use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use job_mail_monitor::classifier::KeywordClassifier;
use job_mail_monitor::config::MonitorConfig;
use job_mail_monitor::error::ConfigError;
use job_mail_monitor::mail::EmlDirSource;
use job_mail_monitor::monitor::{
    Monitor, MonitorDeps, RunSettings, Schedule, reset_state, spawn_monitor_loop, state_stats,
};
use job_mail_monitor::notify::{
    DEFAULT_DIGEST_SUBJECT, LogNotifier, Notifier, SmtpConfig, SmtpNotifier,
};
use job_mail_monitor::tracker::{FileStateStore, MemoryStateStore, SeenTracker, StateStore};

/// Job-related email monitor.
#[derive(Parser)]
#[command(
    name = "job-mail-monitor",
    about = "Notify about new job-related emails, once each",
    version
)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Perform a single run and print its report as JSON.
    Run {
        /// Log the digest instead of sending it and never write state.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run on a schedule until interrupted.
    Daemon {
        /// Seconds between runs.
        #[arg(long, default_value_t = 300, conflicts_with = "cron")]
        interval: u64,

        /// Cron expression with seconds field, e.g. "0 0 8,20 * * *".
        #[arg(long)]
        cron: Option<String>,

        /// Log the digest instead of sending it and never write state.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the persisted seen-set.
    Stats,

    /// Clear the persisted seen-set.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    let config = MonitorConfig::from_env()?;
    let _log_guard = init_tracing(cli.verbose, config.log_dir.as_deref());

    match cli.command {
        Commands::Run { dry_run } => {
            let monitor = build_monitor(&config, dry_run).await?;
            let report = monitor.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Daemon {
            interval,
            cron,
            dry_run,
        } => {
            let schedule = match cron {
                Some(expr) => Schedule::cron(&expr)?,
                None => Schedule::Interval(Duration::from_secs(interval.max(1))),
            };
            let monitor = Arc::new(build_monitor(&config, dry_run).await?);
            let monitor_loop = spawn_monitor_loop(monitor, schedule);

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            tracing::info!("Shutdown requested, waiting for the current run to finish");
            monitor_loop.shutdown().await;
        }
        Commands::Stats => {
            let stats = state_stats(&FileStateStore::new(&config.state_path)).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Reset => {
            reset_state(&FileStateStore::new(&config.state_path)).await?;
            eprintln!("Cleared seen-set at {}", config.state_path.display());
        }
    }

    Ok(())
}

/// Stderr logging plus an optional daily-rolling file. The returned guard
/// flushes the file writer on drop.
fn init_tracing(
    verbose: bool,
    log_dir: Option<&Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "job-mail-monitor.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(file_layer)
        .init();

    guard
}

async fn build_monitor(config: &MonitorConfig, dry_run: bool) -> anyhow::Result<Monitor> {
    let rules = config.load_rules()?;
    let tracker = SeenTracker::new(config.tracker_config(&rules)?);
    let classifier = Arc::new(KeywordClassifier::new(rules.classifier)?);

    let source_dir = config
        .source_dir
        .clone()
        .ok_or_else(|| ConfigError::MissingEnvVar("MONITOR_SOURCE_DIR".into()))?;
    let source = Arc::new(EmlDirSource::new(source_dir));

    let file_store = FileStateStore::new(&config.state_path);
    let store: Arc<dyn StateStore> = if dry_run {
        // Seed from the file so a dry run sees real state but never writes it.
        Arc::new(MemoryStateStore::seeded_from_file(file_store.path()).await?)
    } else {
        Arc::new(file_store)
    };

    let smtp = if dry_run { None } else { SmtpConfig::from_env() };
    let digest_subject = smtp
        .as_ref()
        .map(|c| c.subject.clone())
        .or_else(|| std::env::var("MONITOR_DIGEST_SUBJECT").ok())
        .unwrap_or_else(|| DEFAULT_DIGEST_SUBJECT.to_string());
    let notifier: Arc<dyn Notifier> = match smtp {
        Some(cfg) => {
            tracing::info!(
                server = %cfg.server,
                to = %cfg.to_address,
                "SMTP notifications enabled"
            );
            Arc::new(SmtpNotifier::new(cfg))
        }
        None => {
            tracing::info!("SMTP not configured or dry run, digests will be logged");
            Arc::new(LogNotifier)
        }
    };

    let settings = RunSettings {
        max_results: config.max_results,
        run_timeout: config.run_timeout,
        digest_subject,
    };

    Ok(Monitor::new(
        MonitorDeps {
            source,
            classifier,
            notifier,
            store,
        },
        tracker,
        settings,
    ))
}
