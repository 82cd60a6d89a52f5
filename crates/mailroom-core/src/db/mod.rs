//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `accounts` - Linked mailboxes, OAuth tokens, and sync state
//! - `messages` - Idempotent message upserts and attachment rows
//! - `blobs` - Content store index and inline fallback storage
//! - `automation` - Module configs, rules, and the append-only automation log
//! - `operations` - Side-effect targets (operations, tasks, notes, notifications)
//! - `suggestions` - Financial suggestions, duplicate checks, and review transitions
//! - `audit` - API audit trail

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{Error, Result};

mod accounts;
mod audit;
mod automation;
mod blobs;
mod messages;
mod operations;
mod suggestions;

pub use audit::AuditEntry;
pub use messages::{MessageInsertResult, NewAttachment};
pub use suggestions::SuggestionFilter;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "MAILROOM_DB_KEY";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Fixed application salt - changing this would invalidate all existing encrypted databases
    const APP_SALT: &[u8; 16] = b"mailroom-salt-v1";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Format a timestamp the way SQLite's CURRENT_TIMESTAMP does, so string comparisons work
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `MAILROOM_DB_KEY` to be set. The database is encrypted with
    /// SQLCipher using a key derived from the passphrase via Argon2.
    pub fn new(path: &str) -> Result<Self> {
        let encryption_key = std::env::var(DB_KEY_ENV).ok();
        match encryption_key {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    ///
    /// WARNING: OAuth tokens are stored in this database. Only use for
    /// development or testing.
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        let pool = if let Some(pass) = passphrase {
            let key = derive_key(pass)?;
            let key_pragma = format!("PRAGMA key = 'x\"{}\"'; PRAGMA busy_timeout = 5000;", key);

            // Use with_init to set the key on every new connection
            let manager = manager.with_init(move |conn| {
                conn.execute_batch(&key_pragma)?;
                Ok(())
            });

            Pool::builder().max_size(10).build(manager)?
        } else {
            let manager = manager.with_init(|conn| {
                conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
                Ok(())
            });
            Pool::builder().max_size(10).build(manager)?
        };

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create an in-memory database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because every pooled
    /// connection must see the same database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "mailroom_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let path = path.to_string_lossy().to_string();

        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path)
    }

    /// Check if the database is encrypted
    pub fn is_encrypted(&self) -> Result<bool> {
        let conn = self.conn()?;
        // SQLCipher sets cipher_version if encryption is active
        let result: rusqlite::Result<String> =
            conn.query_row("PRAGMA cipher_version;", [], |row| row.get(0));
        Ok(result.is_ok() && std::env::var(DB_KEY_ENV).is_ok())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Enable foreign keys
            PRAGMA foreign_keys = ON;

            -- WAL mode: readers don't block the sync writer
            PRAGMA journal_mode = WAL;
            PRAGMA cache_size = 2000;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- Linked mailboxes
            CREATE TABLE IF NOT EXISTS mail_accounts (
                id INTEGER PRIMARY KEY,
                provider TEXT NOT NULL,
                provider_account_id TEXT NOT NULL,
                email TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                token_expires_at DATETIME,
                sync_enabled INTEGER NOT NULL DEFAULT 1,
                sync_status TEXT NOT NULL DEFAULT 'never',  -- never, syncing, completed, error
                last_sync_date DATETIME,
                sync_range_months INTEGER NOT NULL DEFAULT 3,
                sync_page_token TEXT,                       -- next page to fetch when resuming
                last_sync_error TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(provider, provider_account_id)
            );

            -- Synced messages (spam-filtered ones are kept as metadata only)
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY,
                account_id INTEGER NOT NULL REFERENCES mail_accounts(id) ON DELETE CASCADE,
                provider_message_id TEXT NOT NULL,
                thread_id TEXT,
                sender TEXT NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                snippet TEXT NOT NULL DEFAULT '',
                received_at DATETIME NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                has_attachments INTEGER NOT NULL DEFAULT 0,
                body_content_hash TEXT,                     -- weak reference into blobs
                is_spam_filtered INTEGER NOT NULL DEFAULT 0,
                spam_reason TEXT,
                processed_at DATETIME,                      -- set once body, attachments, and automation ran
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(account_id, provider_message_id)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_account ON messages(account_id, received_at);

            -- Attachments (many rows may share one content hash)
            CREATE TABLE IF NOT EXISTS attachments (
                id INTEGER PRIMARY KEY,
                message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                provider_attachment_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(message_id, provider_attachment_id)
            );

            CREATE INDEX IF NOT EXISTS idx_attachments_hash ON attachments(content_hash);

            -- Content store index; inline_data is set only when the backend was unreachable
            CREATE TABLE IF NOT EXISTS blobs (
                hash TEXT PRIMARY KEY,
                size INTEGER NOT NULL,
                location TEXT NOT NULL DEFAULT 'backend',   -- backend, inline
                inline_data BLOB,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- One config per automation module
            CREATE TABLE IF NOT EXISTS automation_configs (
                id INTEGER PRIMARY KEY,
                module TEXT NOT NULL UNIQUE,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                process_attachments INTEGER NOT NULL DEFAULT 1,
                auto_create_tasks INTEGER NOT NULL DEFAULT 0,
                auto_create_notes INTEGER NOT NULL DEFAULT 0,
                ai_optimization_level TEXT NOT NULL DEFAULT 'balanced',
                auto_detect_payments INTEGER NOT NULL DEFAULT 0,
                auto_detect_expenses INTEGER NOT NULL DEFAULT 0,
                duplicate_window_days INTEGER NOT NULL DEFAULT 3,
                selected_account_ids TEXT NOT NULL DEFAULT '[]',   -- JSON array
                selected_employee_ids TEXT NOT NULL DEFAULT '[]',  -- JSON array
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Rules store validated condition/action JSON
            -- Rules are immutable apart from is_enabled; ids are never reused
            CREATE TABLE IF NOT EXISTS automation_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                config_id INTEGER NOT NULL REFERENCES automation_configs(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                conditions TEXT NOT NULL,
                actions TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_rules_config ON automation_rules(config_id, priority);

            -- Append-only
            CREATE TABLE IF NOT EXISTS automation_logs (
                id INTEGER PRIMARY KEY,
                rule_id INTEGER,
                message_id INTEGER,
                action_type TEXT NOT NULL,
                outcome TEXT NOT NULL,                      -- success, error, skipped
                error_message TEXT,
                details TEXT NOT NULL DEFAULT '{}',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_automation_logs_rule ON automation_logs(rule_id);
            CREATE INDEX IF NOT EXISTS idx_automation_logs_message ON automation_logs(message_id);

            -- Side-effect targets
            CREATE TABLE IF NOT EXISTS operations (
                id INTEGER PRIMARY KEY,
                reference TEXT NOT NULL UNIQUE COLLATE NOCASE,
                title TEXT NOT NULL,
                source_message_id INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                assignee_employee_id INTEGER,
                source_message_id INTEGER,
                rule_id INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS notes (
                id INTEGER PRIMARY KEY,
                body TEXT NOT NULL,
                source_message_id INTEGER,
                rule_id INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY,
                message TEXT NOT NULL,
                source_message_id INTEGER,
                rule_id INTEGER,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Financial suggestions (duplicates are flagged, never dropped)
            CREATE TABLE IF NOT EXISTS financial_suggestions (
                id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,                         -- payment, expense
                amount_cents INTEGER NOT NULL,
                currency TEXT NOT NULL,
                description TEXT,
                document_date DATE,
                ai_confidence INTEGER NOT NULL,             -- 0-100
                extraction_method TEXT NOT NULL DEFAULT 'ai',
                status TEXT NOT NULL DEFAULT 'pending',     -- pending, approved, rejected
                is_duplicate INTEGER NOT NULL DEFAULT 0,
                duplicate_reason TEXT,
                related_suggestion_id INTEGER,
                operation_id INTEGER,
                source_message_id INTEGER,
                source_attachment_id INTEGER,
                rejection_reason TEXT,
                reviewed_by TEXT,
                reviewed_at DATETIME,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_suggestions_status ON financial_suggestions(status);
            CREATE INDEX IF NOT EXISTS idx_suggestions_dup
                ON financial_suggestions(operation_id, kind, amount_cents, currency);

            -- Downstream payment/expense records created on approval
            CREATE TABLE IF NOT EXISTS financial_records (
                id INTEGER PRIMARY KEY,
                suggestion_id INTEGER NOT NULL UNIQUE REFERENCES financial_suggestions(id),
                kind TEXT NOT NULL,
                amount_cents INTEGER NOT NULL,
                currency TEXT NOT NULL,
                operation_id INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Audit log (tracks all API mutations)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                user_email TEXT NOT NULL,
                action TEXT NOT NULL,
                entity_type TEXT,
                entity_id INTEGER,
                details TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_audit_log_timestamp ON audit_log(timestamp);
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }
}
