//! # CloudVault CLI (`vault`)
//!
//! The `vault` binary manages a user's document vault from the terminal and
//! serves the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! vault --config ./config/vault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vault init` | Create the SQLite database and schema |
//! | `vault upload <paths..>` | Upload files as the configured identity |
//! | `vault list [--query]` | List files, optionally filtered |
//! | `vault summarize <id>` | Summarize a file on demand |
//! | `vault delete <id>` | Delete a file and its content |
//! | `vault devices list` | Print agents with online/offline status |
//! | `vault devices remove <id>` | Remove a print agent |
//! | `vault devices heartbeat <id> [--name] [--printer..]` | Record a heartbeat as an agent would |
//! | `vault print <file-id> --device --printer` | Queue a print job |
//! | `vault chat open <uid>` | Open a conversation with another user |
//! | `vault chat list` | Your conversations, most recent first |
//! | `vault chat send <conversation> <text>` | Send a message |
//! | `vault chat history <conversation>` | Show the latest messages |
//! | `vault chat search <email>` | Find other users by email |
//! | `vault serve` | Start the HTTP server |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `info,cloudvault=debug`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use cloudvault::{commands, config, migrate, runtime::Runtime, server};

/// CloudVault: a multi-tenant document vault with on-demand AI summaries,
/// chat, and remote printing.
#[derive(Parser)]
#[command(name = "vault", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Upload one or more files.
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List your files, newest first.
    List {
        /// Case-insensitive filter over name and summary.
        #[arg(long, short)]
        query: Option<String>,
    },

    /// Summarize a file. Returns the stored summary if there is one.
    Summarize { id: String },

    /// Delete a file.
    Delete { id: String },

    /// Inspect and manage print agents.
    Devices {
        #[command(subcommand)]
        action: DevicesAction,
    },

    /// Send a file to a printer on an online device.
    Print {
        file_id: String,

        #[arg(long)]
        device: String,

        #[arg(long)]
        printer: String,
    },

    /// Message other users.
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },

    /// Start the HTTP server.
    Serve,
}

#[derive(Subcommand)]
enum DevicesAction {
    /// List devices, online first.
    List,

    /// Remove a device. Its queued jobs are kept.
    Remove { id: String },

    /// Record a heartbeat, as a print agent would.
    Heartbeat {
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long = "printer")]
        printers: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ChatAction {
    /// Open (or create) a conversation with another user.
    Open {
        uid: String,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        name: Option<String>,
    },

    /// List your conversations, most recent first.
    List,

    /// Send a message.
    Send { conversation: String, text: String },

    /// Show the latest messages of a conversation.
    History { conversation: String },

    /// Find users by exact email.
    Search { email: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cloudvault=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let rt = Runtime::open(&cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Upload { paths } => commands::run_upload(&rt, &paths).await?,
        Commands::List { query } => commands::run_list(&rt, query.as_deref()).await?,
        Commands::Summarize { id } => commands::run_summarize(&rt, &id).await?,
        Commands::Delete { id } => commands::run_delete(&rt, &id).await?,
        Commands::Devices { action } => match action {
            DevicesAction::List => commands::run_devices_list(&rt).await?,
            DevicesAction::Remove { id } => commands::run_devices_remove(&rt, &id).await?,
            DevicesAction::Heartbeat { id, name, printers } => {
                commands::run_devices_heartbeat(&rt, &id, name, printers).await?
            }
        },
        Commands::Print {
            file_id,
            device,
            printer,
        } => commands::run_print(&rt, &file_id, &device, &printer).await?,
        Commands::Chat { action } => match action {
            ChatAction::Open { uid, email, name } => {
                commands::run_chat_open(&rt, &uid, email, name).await?
            }
            ChatAction::List => commands::run_chat_list(&rt).await?,
            ChatAction::Send { conversation, text } => {
                commands::run_chat_send(&rt, &conversation, &text).await?
            }
            ChatAction::History { conversation } => {
                commands::run_chat_history(&rt, &conversation).await?
            }
            ChatAction::Search { email } => commands::run_users_search(&rt, &email).await?,
        },
        Commands::Serve => server::run_server(rt).await?,
    }

    Ok(())
}
