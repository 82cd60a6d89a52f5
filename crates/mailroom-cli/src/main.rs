//! Mailroom CLI - Email ingestion and automation pipeline
//!
//! Usage:
//!   mailroom init                   Initialize database
//!   mailroom sync --account 1       Sync a mailbox
//!   mailroom suggestions            Review pending financial suggestions
//!   mailroom serve --port 3000      Start web server

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let data_dir = commands::resolve_data_dir(cli.data_dir.as_deref());

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Serve {
            port,
            host,
            static_dir,
        } => {
            commands::cmd_serve(
                &cli.db,
                &data_dir,
                &host,
                port,
                cli.no_encrypt,
                static_dir.as_deref(),
            )
            .await
        }
        Commands::Status => commands::cmd_status(&cli.db, cli.no_encrypt),
        Commands::Accounts { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None | Some(AccountsAction::List) => commands::cmd_accounts_list(&db),
                Some(AccountsAction::Enable { id }) => {
                    commands::cmd_accounts_set_sync(&db, id, true)
                }
                Some(AccountsAction::Disable { id }) => {
                    commands::cmd_accounts_set_sync(&db, id, false)
                }
                Some(AccountsAction::Remove { id }) => commands::cmd_accounts_remove(&db, id),
            }
        }
        Commands::Sync { account } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_sync(db, &data_dir, account).await
        }
        Commands::Rules { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                RulesAction::List { module } => commands::cmd_rules_list(&db, &module),
                RulesAction::Add { module, file } => commands::cmd_rules_add(&db, &module, &file),
                RulesAction::Test {
                    module,
                    sender,
                    subject,
                } => commands::cmd_rules_test(&db, &module, &sender, &subject),
                RulesAction::Delete { id } => commands::cmd_rules_delete(&db, id),
            }
        }
        Commands::Suggestions { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None => commands::cmd_suggestions_list(&db, "pending", 20),
                Some(SuggestionsAction::List { status, limit }) => {
                    commands::cmd_suggestions_list(&db, &status, limit)
                }
                Some(SuggestionsAction::Approve { id }) => {
                    commands::cmd_suggestions_approve(&db, id)
                }
                Some(SuggestionsAction::Reject { id, reason }) => {
                    commands::cmd_suggestions_reject(&db, id, reason.as_deref())
                }
            }
        }
        Commands::Classify { sender, subject } => commands::cmd_classify(&sender, &subject),
        Commands::Blobs { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                BlobsAction::Put { file } => commands::cmd_blobs_put(db, &data_dir, &file).await,
                BlobsAction::Get { hash, out } => {
                    commands::cmd_blobs_get(db, &data_dir, &hash, out.as_deref()).await
                }
            }
        }
    }
}
