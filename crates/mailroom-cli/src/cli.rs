//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Mailroom - Email ingestion and automation for the logistics ERP
#[derive(Parser)]
#[command(name = "mailroom")]
#[command(about = "Mailbox sync, dedup, and automation pipeline", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "mailroom.db", global = true)]
    pub db: PathBuf,

    /// Data directory for local blobs and config overrides
    ///
    /// Defaults to the platform data dir (e.g. ~/.local/share/mailroom).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set MAILROOM_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Directory containing static files to serve (e.g., ui/dist)
        #[arg(long)]
        static_dir: Option<PathBuf>,
    },

    /// Show database and pipeline status
    Status,

    /// Manage linked mailboxes
    Accounts {
        #[command(subcommand)]
        action: Option<AccountsAction>,
    },

    /// Sync one mailbox, or every sync-enabled mailbox
    Sync {
        /// Account ID (all enabled accounts if omitted)
        #[arg(short, long)]
        account: Option<i64>,
    },

    /// Manage automation rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },

    /// Review financial suggestions
    Suggestions {
        #[command(subcommand)]
        action: Option<SuggestionsAction>,
    },

    /// Run the spam classifier on a sender and subject
    Classify {
        /// Sender address
        #[arg(long)]
        sender: String,

        /// Subject line
        #[arg(long, default_value = "")]
        subject: String,
    },

    /// Content store operations
    Blobs {
        #[command(subcommand)]
        action: BlobsAction,
    },
}

#[derive(Subcommand)]
pub enum AccountsAction {
    /// List linked mailboxes (default)
    List,
    /// Turn scheduled sync on
    Enable { id: i64 },
    /// Turn scheduled sync off
    Disable { id: i64 },
    /// Disconnect a mailbox and drop its messages
    Remove { id: i64 },
}

#[derive(Subcommand)]
pub enum RulesAction {
    /// List rules for a module in evaluation order
    List {
        /// Automation module (e.g. operations)
        #[arg(short, long, default_value = "operations")]
        module: String,
    },
    /// Add a rule from a JSON definition file
    Add {
        #[arg(short, long, default_value = "operations")]
        module: String,

        /// JSON file with name, conditions, actions, priority
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Show which rules would fire for a sender and subject
    Test {
        #[arg(short, long, default_value = "operations")]
        module: String,

        #[arg(long)]
        sender: String,

        #[arg(long, default_value = "")]
        subject: String,
    },
    /// Delete a rule
    Delete { id: i64 },
}

#[derive(Subcommand)]
pub enum SuggestionsAction {
    /// List suggestions (pending by default)
    List {
        /// Status filter: pending, approved, rejected, all
        #[arg(short, long, default_value = "pending")]
        status: String,

        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
    /// Approve a pending suggestion
    Approve { id: i64 },
    /// Reject a pending suggestion
    Reject {
        id: i64,

        #[arg(short, long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum BlobsAction {
    /// Store a file and print its content hash
    Put { file: PathBuf },
    /// Write a blob to a file (or stdout)
    Get {
        hash: String,

        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}
