mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "chunkdrive", version, about = "Chunked file transfer tools")]
struct Cli {
    /// Client configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the configured maximum chunk size, in bytes
    #[arg(long, global = true, value_name = "BYTES")]
    chunk_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Split a file and print its transfer metadata as JSON
    Plan {
        /// File to plan
        file: PathBuf,

        /// Remote parent folder id
        #[arg(long, default_value_t = 0)]
        dir_id: i64,
    },

    /// Check a file against previously saved metadata
    Verify {
        /// File to check
        file: PathBuf,

        /// Metadata JSON produced by `plan`
        metadata: PathBuf,
    },

    /// Upload a file to an in-memory store and download it back
    Loopback {
        /// File to send
        file: PathBuf,

        /// Where to write the downloaded copy
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref(), cli.chunk_size)?;

    match cli.command {
        Commands::Plan { file, dir_id } => commands::run_plan(&config, &file, dir_id),
        Commands::Verify { file, metadata } => commands::run_verify(&file, &metadata),
        Commands::Loopback { file, output } => commands::run_loopback(config, &file, &output).await,
    }
}
