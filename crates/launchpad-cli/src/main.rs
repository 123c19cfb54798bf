//! Operator CLI for the execution lifecycle manager
//!
//! Registers artifacts, starts and stops executions, reads run logs, and runs
//! the expiry sweep that stops executions past their scheduled shutdown.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use launchpad_core::config::ConfigLoader;
use launchpad_core::engine::DockerEngine;
use launchpad_core::runner::DockerImageRunner;
use launchpad_core::{
    Artifact, ArtifactId, BuildStatus, Database, ExecutionId, LaunchError, LaunchpadConfig,
    LifecycleManager, Locale, OperatorId, Platform, RunConfig, SqliteArtifactCatalog, TaskType,
};
use log::LevelFilter;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Launchpad - Run sandboxed web-application executions")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, default_value = "launchpad.yaml", help = "Configuration file path")]
    config: String,

    #[clap(long, short, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage the artifact catalog
    Artifact {
        #[clap(subcommand)]
        action: ArtifactCommands,
    },
    /// Start an execution and print its descriptor as JSON
    Start {
        #[clap(long)]
        artifact: String,

        #[clap(long)]
        operator: String,

        #[clap(long, help = "Run interval in minutes (defaults to the configured interval)")]
        minutes: Option<i64>,
    },
    /// Stop an execution and remove its record
    Stop {
        #[clap(long)]
        execution: String,
    },
    /// Print the run log of an execution
    Logs {
        #[clap(long)]
        execution: String,
    },
    /// List registered executions
    List,
    /// Stop every execution whose scheduled shutdown has passed
    Sweep,
}

#[derive(Subcommand, Debug)]
enum ArtifactCommands {
    /// Register or update an artifact
    Register {
        #[clap(long)]
        id: String,

        #[clap(long, default_value = "linux")]
        platform: String,

        #[clap(long, default_value = "web_app")]
        task_type: String,

        #[clap(long)]
        image: String,

        #[clap(long, default_value = "built")]
        status: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    log::debug!("Loading configuration from file: {}", cli.config);
    let config = Arc::new(ConfigLoader::from_file(&cli.config).await?);
    let locale = config.locale;

    if let Err(e) = run(cli.command, config).await {
        match e.downcast_ref::<LaunchError>() {
            Some(launch_error) => {
                log::debug!("Command failed: {}", launch_error);
                eprintln!("{}", launch_error.user_message(locale));
            }
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: Commands, config: Arc<LaunchpadConfig>) -> Result<()> {
    let database_path = config.database_path();
    log::debug!("Opening database {}", database_path.display());
    let database = Database::open(&database_path)?;
    let catalog = SqliteArtifactCatalog::new(database.clone());

    match command {
        Commands::Artifact { action } => handle_artifact_command(action, &catalog)?,
        Commands::Start {
            artifact,
            operator,
            minutes,
        } => {
            let manager = build_manager(config.clone(), database, catalog)?;
            let run_config = match minutes {
                Some(minutes) => RunConfig::try_from_minutes(minutes).map_err(LaunchError::from)?,
                None => config.default_run_config(),
            };
            let descriptor = manager
                .start_execution(
                    &ArtifactId(artifact),
                    &OperatorId(operator),
                    run_config,
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
        }
        Commands::Stop { execution } => {
            let manager = build_manager(config.clone(), database, catalog)?;
            manager.stop_execution(&ExecutionId(execution.clone())).await?;
            println!("Execution {} stopped.", execution);
        }
        Commands::Logs { execution } => {
            let manager = build_manager(config.clone(), database, catalog)?;
            let log = manager.fetch_run_log(&ExecutionId(execution)).await?;
            print!("{}", log);
        }
        Commands::List => {
            let manager = build_manager(config.clone(), database, catalog)?;
            let records = manager.list_executions()?;
            if records.is_empty() {
                println!("No executions registered.");
            } else {
                for record in records {
                    let state = match (&record.container_handle, record.scheduled_shutdown_at) {
                        (Some(_), Some(shutdown)) => format!("running until {}", shutdown),
                        _ => "reserved".to_string(),
                    };
                    println!(
                        "{}  {}  {}  {}:{}  {}",
                        record.id,
                        record.artifact_id,
                        record.operator_id,
                        record.engine_host_url,
                        record.port,
                        state
                    );
                }
            }
        }
        Commands::Sweep => {
            let manager = build_manager(config.clone(), database, catalog)?;
            sweep(&manager, config.locale).await?
        }
    }
    Ok(())
}

fn build_manager(
    config: Arc<LaunchpadConfig>,
    database: Database,
    catalog: SqliteArtifactCatalog,
) -> Result<LifecycleManager> {
    let engine = DockerEngine::from_config(&config)?;
    let runner = DockerImageRunner::new(&engine, &config)?;
    Ok(LifecycleManager::new(
        config,
        database,
        Arc::new(catalog),
        Arc::new(engine),
        Arc::new(runner),
    ))
}

async fn sweep(manager: &LifecycleManager, locale: Locale) -> Result<()> {
    let expired = manager.expired_executions(Utc::now())?;
    log::info!("Sweep found {} expired executions", expired.len());

    let mut failures = 0;
    for record in expired {
        match manager.stop_execution(&record.id).await {
            Ok(()) => println!("Stopped {}", record.id),
            // Another sweep got there first.
            Err(LaunchError::ExecutionNotFound(_)) => {}
            Err(e) => {
                failures += 1;
                log::error!("Failed to stop expired execution {}: {}", record.id, e);
                eprintln!("{}: {}", record.id, e.user_message(locale));
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} expired executions could not be stopped cleanly", failures);
    }
    Ok(())
}

fn handle_artifact_command(action: ArtifactCommands, catalog: &SqliteArtifactCatalog) -> Result<()> {
    match action {
        ArtifactCommands::Register {
            id,
            platform,
            task_type,
            image,
            status,
        } => {
            let artifact = Artifact {
                id: ArtifactId(id),
                task_type: task_type.parse::<TaskType>().map_err(anyhow::Error::msg)?,
                build_status: status.parse::<BuildStatus>().map_err(anyhow::Error::msg)?,
                platform: platform.parse::<Platform>().map_err(anyhow::Error::msg)?,
                image,
                error_message: None,
            };
            catalog.register(&artifact)?;
            println!("Artifact {} registered.", artifact.id);
        }
    }
    Ok(())
}
