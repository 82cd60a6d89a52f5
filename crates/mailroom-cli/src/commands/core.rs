//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `resolve_data_dir` - Where local blobs and overrides live
//! - `cmd_init` - Initialize the database
//! - `cmd_classify` - Spam classifier dry-run

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mailroom_core::db::Database;
use mailroom_core::models::AutomationConfigUpdate;
use mailroom_core::spam::{SpamClassifier, SpamPolicy};

/// Module seeded by `init` so rules can be added right away
pub const DEFAULT_MODULE: &str = "operations";

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// `--data-dir`, else `MAILROOM_DATA_DIR`, else the platform data dir
pub fn resolve_data_dir(arg: Option<&Path>) -> PathBuf {
    if let Some(dir) = arg {
        return dir.to_path_buf();
    }
    if let Ok(dir) = std::env::var("MAILROOM_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailroom")
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;

    if db.get_automation_config(DEFAULT_MODULE)?.is_none() {
        db.upsert_automation_config(DEFAULT_MODULE, &AutomationConfigUpdate::default())
            .context("Failed to seed automation config")?;
        println!("   Seeded '{}' automation config", DEFAULT_MODULE);
    }

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Start the server: mailroom serve");
    println!("  2. Connect a mailbox: POST /api/accounts");
    println!("  3. Sync it: mailroom sync --account <id>");

    Ok(())
}

pub fn cmd_classify(sender: &str, subject: &str) -> Result<()> {
    let classifier = SpamClassifier::new(SpamPolicy::load()?);
    let verdict = classifier.classify(sender, subject);

    let label = if verdict.keep { "✅ KEEP" } else { "🗑️  DROP" };
    println!("{} ({:.0}% confidence)", label, verdict.confidence * 100.0);
    println!("   {}", verdict.reason);

    Ok(())
}
