//! # securechat
//!
//! Command-line client for SecureChat relays.
//!
//! ## Commands
//!
//! - `listen`: Stay connected and print messages as they arrive
//! - `send`: Send a text message
//! - `send-file`: Upload a file and announce it
//! - `download`: Download and decrypt a shared file
//! - `history`: Print the locally stored history
//!
//! ## Example
//!
//! ```bash
//! export SECURECHAT_SERVER=relay.example:8080
//!
//! # Follow the room (prompts for the passphrase)
//! securechat --id alice --secret rosemary listen
//!
//! # In another terminal
//! securechat --id bob send "hello alice"
//! securechat --id bob send-file ./photo.jpg
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{download, history, listen, send, send_file, ChatOptions};

/// Command-line client for SecureChat relays.
#[derive(Parser, Debug)]
#[command(name = "securechat")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Relay address (host:port, wss://... or https://...)
    #[arg(long, short, env = "SECURECHAT_SERVER")]
    server: String,

    /// Display name shown to other participants
    #[arg(long, env = "SECURECHAT_ID", default_value = "anonymous")]
    id: String,

    /// Room passphrase (will prompt if not provided)
    #[arg(long, short, env = "SECURECHAT_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    /// Tripcode secret; appends #xxxxxx to your name
    #[arg(long, env = "SECURECHAT_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Data directory for the local message mirror
    #[arg(long, env = "SECURECHAT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stay connected and print messages as they arrive
    Listen {
        /// Print stored history before going live
        #[arg(long)]
        history: bool,
    },

    /// Send a text message
    Send {
        /// Message text
        text: String,
    },

    /// Upload a file and announce it to the room
    SendFile {
        /// File to share
        path: PathBuf,
    },

    /// Download and decrypt a shared file
    Download {
        /// Content hash from the file message
        hash: String,

        /// Where to write the decrypted file
        output: PathBuf,
    },

    /// Print the locally stored history
    History {
        /// Only show the most recent messages
        #[arg(long, short)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,securechat_client=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    let options = ChatOptions::new(
        cli.server,
        &cli.id,
        cli.secret.as_deref(),
        cli.passphrase,
        data_dir,
    );

    match cli.command {
        Commands::Listen { history } => listen::run(&options, history).await?,
        Commands::Send { text } => send::run(&options, &text).await?,
        Commands::SendFile { path } => send_file::run(&options, &path).await?,
        Commands::Download { hash, output } => download::run(&options, &hash, &output).await?,
        Commands::History { limit } => history::run(&options, limit).await?,
    }

    Ok(())
}

/// Get the default data directory for securechat.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "securechat", "securechat")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
