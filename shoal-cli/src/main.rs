//! Shoal CLI - run an index or a peer, and drive swarm operations.

use std::path::PathBuf;

use clap::Parser;
use shoal_core::tracing_setup::{CliLogLevel, init_tracing};

mod commands;

#[derive(Parser)]
#[command(name = "shoal")]
#[command(about = "A centrally-indexed peer-to-peer file sharing swarm")]
struct Cli {
    /// Console log level
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the central index
    Index {
        /// Port to listen on
        #[arg(long, default_value_t = 6000)]
        port: u16,
        /// Directory holding descriptor files
        #[arg(long, default_value = "./torrents")]
        torrents_dir: PathBuf,
    },
    /// Run a peer node
    Peer {
        /// Port to listen on (also fixes the data directory)
        #[arg(long)]
        port: u16,
        /// Index endpoint as host:port
        #[arg(long, default_value = "127.0.0.1:6000")]
        index: String,
        /// Volunteer for the contributor pool
        #[arg(long)]
        contributor: bool,
        /// Directory under which the peer keeps its data
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,
    },
    /// Upload a local file into the swarm (uses a running peer's data directory)
    Upload {
        /// File to upload
        file: PathBuf,
        /// Port of the peer whose identity and directories to use
        #[arg(long)]
        port: u16,
        /// Index endpoint as host:port
        #[arg(long, default_value = "127.0.0.1:6000")]
        index: String,
        /// Directory under which the peer keeps its data
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,
    },
    /// Download a file by name (uses a running peer's data directory)
    Download {
        /// File name as registered at the index
        file_name: String,
        /// Port of the peer whose identity and directories to use
        #[arg(long)]
        port: u16,
        /// Index endpoint as host:port
        #[arg(long, default_value = "127.0.0.1:6000")]
        index: String,
        /// Directory under which the peer keeps its data
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,
    },
    /// Fuzzy-search the index by song or artist name
    Search {
        /// Query string
        query: String,
        /// Index endpoint as host:port
        #[arg(long, default_value = "127.0.0.1:6000")]
        index: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Long-running nodes get their own debug log file; one-shot
    // commands log to the console only.
    let node_name = match &cli.command {
        Commands::Index { port, .. } => Some(format!("index-{port}")),
        Commands::Peer { port, .. } => Some(format!("peer-{port}")),
        _ => None,
    };
    init_tracing(cli.log_level, node_name.as_deref())?;

    match cli.command {
        Commands::Index { port, torrents_dir } => {
            commands::run_index(port, torrents_dir).await?;
        }
        Commands::Peer {
            port,
            index,
            contributor,
            base_dir,
        } => {
            commands::run_peer(port, &index, contributor, base_dir).await?;
        }
        Commands::Upload {
            file,
            port,
            index,
            base_dir,
        } => {
            commands::run_upload(&file, port, &index, base_dir).await?;
        }
        Commands::Download {
            file_name,
            port,
            index,
            base_dir,
        } => {
            commands::run_download(&file_name, port, &index, base_dir).await?;
        }
        Commands::Search { query, index } => {
            commands::run_search(&query, &index).await?;
        }
    }

    Ok(())
}
