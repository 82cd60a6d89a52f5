//! Mailbox commands (list, enable, disable, remove, sync)

use std::path::Path;

use anyhow::{bail, Result};
use mailroom_core::db::Database;
use mailroom_core::sync::SyncOutcome;
use mailroom_server::{AppState, ServerConfig};
use tracing::warn;

use super::truncate;

pub fn cmd_accounts_list(db: &Database) -> Result<()> {
    let accounts = db.list_mail_accounts()?;

    if accounts.is_empty() {
        println!("No mailboxes linked.");
        return Ok(());
    }

    println!();
    println!(
        "{:<4} {:<8} {:<32} {:<10} {:<6} {:<20}",
        "ID", "PROVIDER", "EMAIL", "STATUS", "SYNC", "LAST SYNC"
    );
    println!("{}", "─".repeat(84));

    for account in &accounts {
        let last_sync = account
            .last_sync_date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<4} {:<8} {:<32} {:<10} {:<6} {:<20}",
            account.id,
            account.provider,
            truncate(&account.email, 32),
            account.sync_status.as_str(),
            if account.sync_enabled { "on" } else { "off" },
            last_sync
        );
        if let Some(err) = &account.last_sync_error {
            println!("     ⚠️  {}", truncate(err, 76));
        }
    }

    Ok(())
}

pub fn cmd_accounts_set_sync(db: &Database, id: i64, enabled: bool) -> Result<()> {
    if !db.set_sync_enabled(id, enabled)? {
        bail!("Account {} not found", id);
    }
    db.log_audit(
        super::CLI_USER,
        "set_sync_enabled",
        Some("mail_account"),
        Some(id),
        Some(&format!("enabled={}", enabled)),
    )?;

    let word = if enabled { "enabled" } else { "disabled" };
    println!("✅ Scheduled sync {} for account {}", word, id);
    Ok(())
}

pub fn cmd_accounts_remove(db: &Database, id: i64) -> Result<()> {
    if !db.delete_mail_account(id)? {
        bail!("Account {} not found", id);
    }
    db.log_audit(super::CLI_USER, "disconnect", Some("mail_account"), Some(id), None)?;

    println!("✅ Account {} disconnected", id);
    Ok(())
}

pub async fn cmd_sync(db: Database, data_dir: &Path, account: Option<i64>) -> Result<()> {
    let ids: Vec<i64> = match account {
        Some(id) => vec![id],
        None => db
            .list_sync_enabled_accounts()?
            .into_iter()
            .map(|a| a.id)
            .collect(),
    };

    if ids.is_empty() {
        println!("No sync-enabled mailboxes.");
        return Ok(());
    }

    let state = AppState::from_env(db, data_dir, ServerConfig::default())?;
    println!(
        "📬 Syncing {} mailbox(es) via {}",
        ids.len(),
        state.sync.provider_name()
    );

    let mut failures = 0;
    for id in ids {
        match state.sync.sync(id).await {
            Ok(SyncOutcome::Completed(r)) => {
                println!();
                println!("   Account {}", id);
                println!("   ─────────────────────────────");
                println!("   Processed:      {}", r.processed);
                println!("   New:            {}", r.newly_synced);
                println!("   Spam filtered:  {}", r.spam_filtered);
                println!("   Already seen:   {}", r.already_seen);
                println!(
                    "   Attachments:    {} stored, {} deduplicated, {} failed",
                    r.attachments_stored, r.attachments_deduplicated, r.attachment_errors
                );
            }
            Ok(SyncOutcome::AlreadyRunning) => {
                println!("   Account {}: sync already running, skipped", id);
            }
            Err(e) => {
                failures += 1;
                warn!(account_id = id, error = %e, "Sync failed");
                println!("   ❌ Account {}: {}", id, e);
            }
        }
    }

    if failures > 0 {
        bail!("{} sync(s) failed; progress was saved and the next run resumes", failures);
    }
    Ok(())
}
