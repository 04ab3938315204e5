//! Backup Rotator - Main entry point

use anyhow::Result;
use backup_rotator::daemon::scheduler::RunScheduler;
use backup_rotator::daemon::shutdown::ShutdownCoordinator;
use backup_rotator::executor::{list_generations, RunController};
use backup_rotator::sync::Rclone;
use backup_rotator::utils::errors::EXIT_PRECONDITION;
use backup_rotator::{utils, BackupError, Config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "backup-rotator.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch, archive and prune every configured folder once (default)
    Run,

    /// Only apply the retention window
    Prune {
        /// Log what would be deleted without deleting it
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the generations kept for each folder
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Run on the configured cron schedule until SIGINT/SIGTERM
    Daemon,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {:#}", args.config.display(), e);
            return ExitCode::from(EXIT_PRECONDITION);
        }
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    if let Err(e) = utils::logger::init(log_level, config.log.file.as_deref()) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return ExitCode::from(EXIT_PRECONDITION);
    }

    tracing::info!(
        "Starting backup-rotator v{} (remote: {})",
        env!("CARGO_PKG_VERSION"),
        config.remote.name
    );

    match dispatch(args.command.unwrap_or(Command::Run), config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            let code = e
                .downcast_ref::<BackupError>()
                .map_or(EXIT_PRECONDITION, BackupError::exit_code);
            ExitCode::from(code)
        }
    }
}

async fn dispatch(command: Command, config: Config) -> Result<()> {
    let sync = Rclone::new(&config.remote);

    match command {
        Command::Run => {
            let mut controller = RunController::new(config, sync);
            let report = controller.run().await?;
            report.check_deletions()?;
            Ok(())
        }
        Command::Prune { dry_run } => {
            let controller = RunController::new(config, sync);
            let report = controller.prune_all(dry_run).await;
            tracing::info!(
                deleted = report.deleted.len(),
                failed = report.failed.len(),
                "Retention pass finished"
            );
            report.check()?;
            Ok(())
        }
        Command::List { json } => {
            let listing = list_generations(&config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                for folder in &listing {
                    println!(
                        "{} ({} of max {})",
                        folder.folder,
                        folder.generations.len(),
                        folder.max_copies
                    );
                    for generation in &folder.generations {
                        let form = format!("{:?}", generation.form).to_lowercase();
                        println!("  {:<8} {}", form, generation.path.display());
                    }
                }
            }
            Ok(())
        }
        Command::Daemon => {
            let cron = config.schedule.cron.clone().ok_or_else(|| {
                BackupError::Config("schedule.cron is required for daemon mode".into())
            })?;

            let shutdown = ShutdownCoordinator::new();
            let scheduler = RunScheduler::new(RunController::new(config, sync)).await?;
            scheduler.schedule(&cron).await?;
            scheduler.start().await?;

            let signal = shutdown.wait_for_signal().await?;
            tracing::debug!(?signal, "Shutting down daemon");
            scheduler.shutdown().await?;
            Ok(())
        }
    }
}
