//! Status command implementation

use std::path::Path;

use anyhow::Result;
use mailroom_core::ai::{AIBackend, AIClient};
use mailroom_core::db::{Database, SuggestionFilter, DB_KEY_ENV};
use mailroom_core::models::SuggestionStatus;

use super::open_db;

pub fn cmd_status(db_path: &Path, no_encrypt: bool) -> Result<()> {
    use std::fs;

    println!();
    println!("📊 Mailroom Status");
    println!("   ─────────────────────────────────────────────────────────────");

    println!("   Database: {}", db_path.display());

    if db_path.exists() {
        if let Ok(metadata) = fs::metadata(db_path) {
            let size_kb = metadata.len() as f64 / 1024.0;
            if size_kb < 1024.0 {
                println!("   Size: {:.1} KB", size_kb);
            } else {
                println!("   Size: {:.1} MB", size_kb / 1024.0);
            }
        }
    } else {
        println!("   Size: (database not initialized)");
    }

    let has_key = std::env::var(DB_KEY_ENV).is_ok();
    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else if has_key {
        println!("   🔒 Encryption: ENABLED ({}=***)", DB_KEY_ENV);
    } else {
        println!("   ❌ Encryption: REQUIRED but {} not set", DB_KEY_ENV);
    }

    match AIClient::from_env() {
        Some(client) => println!("   🤖 AI: {} ({})", client.host(), client.model()),
        None => println!("   🤖 AI: not configured (heuristic extraction only)"),
    }

    if db_path.exists() {
        match open_db(db_path, no_encrypt) {
            Ok(db) => print_pipeline_stats(&db)?,
            Err(e) => {
                println!();
                println!("   ❌ Error opening database: {}", e);
                if !no_encrypt && !has_key {
                    println!("      Set {} or use --no-encrypt", DB_KEY_ENV);
                } else if has_key {
                    println!("      (Check if {} is correct)", DB_KEY_ENV);
                }
            }
        }
    }

    println!();
    Ok(())
}

pub fn print_pipeline_stats(db: &Database) -> Result<()> {
    let accounts = db.list_mail_accounts()?;
    let mut messages = 0;
    for account in &accounts {
        messages += db.count_messages(account.id)?;
    }
    let (backend_blobs, inline_blobs) = db.count_blobs()?;
    let pending = db
        .list_suggestions(&SuggestionFilter {
            status: Some(SuggestionStatus::Pending),
            operation_id: None,
            limit: Some(i64::MAX),
        })?
        .len();

    println!();
    println!("   Mailboxes: {}", accounts.len());
    println!("   Messages: {}", messages);
    println!(
        "   Blobs: {} ({} inline awaiting backend)",
        backend_blobs + inline_blobs,
        inline_blobs
    );
    println!("   Pending suggestions: {}", pending);

    for account in accounts.iter().filter(|a| a.last_sync_error.is_some()) {
        println!(
            "   ⚠️  {}: {}",
            account.email,
            account.last_sync_error.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}
