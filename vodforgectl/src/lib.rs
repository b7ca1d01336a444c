use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;
use vodforge_core::{load_config_or_default, RuntimeError, Services, VodforgeConfig};

pub mod commands;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] vodforge_core::ConfigError),
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("{0}")]
    Service(#[from] vodforge_core::ServiceError),
    #[error("queue error: {0}")]
    Queue(#[from] vodforge_core::QueueError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "vodforge transcoding worker control interface", long_about = None)]
pub struct Cli {
    /// Path to the main configuration file
    #[arg(long, default_value = "configs/vodforge.toml")]
    pub config: PathBuf,
    /// Override paths.data_dir
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Override paths.scratch_dir
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the transcoding worker daemon
    Worker,
    /// Submit a source object for transcoding
    Submit(commands::submit::SubmitArgs),
    /// Inspect and manage jobs
    Job {
        #[command(subcommand)]
        command: commands::job::JobCommands,
    },
    /// Inspect and control the queue
    Queue {
        #[command(subcommand)]
        command: commands::queue::QueueCommands,
    },
    /// Run a single cleanup sweep and exit
    Reap,
}

impl Cli {
    pub fn load_config(&self) -> Result<VodforgeConfig> {
        let mut config = load_config_or_default(&self.config)?;
        if let Some(data_dir) = &self.data_dir {
            config.paths.data_dir = data_dir.to_string_lossy().to_string();
        }
        if let Some(scratch_dir) = &self.scratch_dir {
            config.paths.scratch_dir = scratch_dir.to_string_lossy().to_string();
        }
        Ok(config)
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;
    match cli.command {
        Commands::Worker => commands::worker::run(config).await,
        Commands::Submit(args) => {
            let services = Services::initialize(config)?;
            commands::submit::run(&services.job_service(), args).await
        }
        Commands::Job { command } => {
            let services = Services::initialize(config)?;
            commands::job::run(&services.job_service(), command)
        }
        Commands::Queue { command } => {
            let services = Services::initialize(config)?;
            commands::queue::run(&services.job_service(), command)
        }
        Commands::Reap => commands::worker::reap(config).await,
    }
}
