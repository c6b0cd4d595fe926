//! `horus-teleop`: the lifecycle supervisor CLI for the bimanual
//! teleoperation recorder. Owns process startup/shutdown ordering on top of
//! the dataflow runtime, episode pipeline, and offload orchestrator in
//! `horus_core`.

mod doctor;
mod logging;
mod supervisor;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "horus-teleop")]
#[command(about = "Lifecycle supervisor for the bimanual teleoperation recorder")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log output format.
    #[arg(long = "log-format", value_enum, default_value = "text", global = true)]
    log_format: LogFormatArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate device config, permissions, and connectivity without starting a session.
    Doctor {
        /// Path to the device config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run a recording session: record episodes, then offload per the configured mode.
    Record {
        /// Path to the device config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory the dataset is written to.
        #[arg(long, default_value = "./dataset")]
        dataset_root: PathBuf,

        /// Assume the remote already has the dataset; start at the training trigger.
        #[arg(long)]
        skip_upload: bool,

        /// Assume training has completed; start at the SFTP model download.
        #[arg(long)]
        download_only: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(match cli.log_format {
        LogFormatArg::Text => logging::LogFormat::Text,
        LogFormatArg::Json => logging::LogFormat::Json,
    });

    let code = match cli.command {
        Commands::Doctor { config } => match doctor::run_doctor(config.as_deref()) {
            Ok(true) => 0,
            Ok(false) => 1,
            Err(e) => {
                eprintln!("{} {}", "error:".red().bold(), e);
                1
            }
        },
        Commands::Record {
            config,
            dataset_root,
            skip_upload,
            download_only,
        } => supervisor::run_session(supervisor::SessionOptions {
            config_path: config,
            dataset_root,
            skip_upload,
            download_only,
        }),
    };

    ExitCode::from(code as u8)
}
