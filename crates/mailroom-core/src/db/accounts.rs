//! Mail account operations and sync state transitions

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{format_datetime, parse_datetime, Database};
use crate::error::Result;
use crate::models::{MailAccount, NewMailAccount, SyncStatus};

const ACCOUNT_COLUMNS: &str = "id, provider, provider_account_id, email, access_token, refresh_token,
     token_expires_at, sync_enabled, sync_status, last_sync_date, sync_range_months,
     sync_page_token, last_sync_error, created_at";

impl Database {
    /// Connect a mailbox, or refresh the credentials of an already linked one
    pub fn upsert_mail_account(&self, account: &NewMailAccount) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO mail_accounts (provider, provider_account_id, email, access_token,
                                       refresh_token, token_expires_at, sync_range_months)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(provider, provider_account_id) DO UPDATE SET
                email = excluded.email,
                access_token = excluded.access_token,
                refresh_token = COALESCE(excluded.refresh_token, mail_accounts.refresh_token),
                token_expires_at = excluded.token_expires_at
            "#,
            params![
                account.provider,
                account.provider_account_id,
                account.email,
                account.access_token,
                account.refresh_token,
                account.token_expires_at.map(|t| format_datetime(&t)),
                account.sync_range_months.max(1),
            ],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM mail_accounts WHERE provider = ? AND provider_account_id = ?",
            params![account.provider, account.provider_account_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// List all linked mailboxes
    pub fn list_mail_accounts(&self) -> Result<Vec<MailAccount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM mail_accounts ORDER BY email",
            ACCOUNT_COLUMNS
        ))?;

        let accounts = stmt
            .query_map([], Self::row_to_mail_account)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    /// Accounts the scheduler should sync
    pub fn list_sync_enabled_accounts(&self) -> Result<Vec<MailAccount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM mail_accounts WHERE sync_enabled = 1 ORDER BY id",
            ACCOUNT_COLUMNS
        ))?;

        let accounts = stmt
            .query_map([], Self::row_to_mail_account)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    /// Get a mailbox by ID
    pub fn get_mail_account(&self, id: i64) -> Result<Option<MailAccount>> {
        let conn = self.conn()?;
        let account = conn
            .query_row(
                &format!("SELECT {} FROM mail_accounts WHERE id = ?", ACCOUNT_COLUMNS),
                params![id],
                Self::row_to_mail_account,
            )
            .optional()?;
        Ok(account)
    }

    /// Disconnect a mailbox
    ///
    /// Message and attachment rows go with it; blobs stay in the content store
    /// since other messages may reference the same hashes.
    pub fn delete_mail_account(&self, id: i64) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM attachments WHERE message_id IN (SELECT id FROM messages WHERE account_id = ?)",
            params![id],
        )?;
        tx.execute("DELETE FROM messages WHERE account_id = ?", params![id])?;
        let deleted = tx.execute("DELETE FROM mail_accounts WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Toggle scheduled syncing; does not interrupt a sync already running
    pub fn set_sync_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE mail_accounts SET sync_enabled = ? WHERE id = ?",
            params![enabled, id],
        )?;
        Ok(updated > 0)
    }

    /// Atomically move an account into `syncing`
    ///
    /// Returns false when a sync is already in flight, which makes a second
    /// trigger a no-op.
    pub fn try_begin_sync(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE mail_accounts SET sync_status = 'syncing' WHERE id = ? AND sync_status != 'syncing'",
            params![id],
        )?;
        Ok(updated == 1)
    }

    /// Persist the token of the next page to fetch after a page was fully consumed
    pub fn save_sync_cursor(&self, id: i64, next_page_token: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE mail_accounts SET sync_page_token = ? WHERE id = ?",
            params![next_page_token, id],
        )?;
        Ok(())
    }

    /// Mark a sync as finished: pages exhausted, cursor cleared
    pub fn complete_sync(&self, id: i64, finished_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE mail_accounts
            SET sync_status = 'completed', last_sync_date = ?, sync_page_token = NULL,
                last_sync_error = NULL
            WHERE id = ?
            "#,
            params![format_datetime(&finished_at), id],
        )?;
        Ok(())
    }

    /// Mark a sync as failed; the cursor is kept so the next run resumes
    pub fn fail_sync(&self, id: i64, error: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE mail_accounts SET sync_status = 'error', last_sync_error = ? WHERE id = ?",
            params![error, id],
        )?;
        Ok(())
    }

    /// Move accounts left in `syncing` by a crashed process to `error`
    pub fn recover_interrupted_syncs(&self) -> Result<usize> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE mail_accounts
            SET sync_status = 'error', last_sync_error = 'sync interrupted'
            WHERE sync_status = 'syncing'
            "#,
            [],
        )?;
        Ok(updated)
    }

    /// Store a rotated OAuth credential pair
    pub fn update_account_tokens(
        &self,
        id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE mail_accounts
            SET access_token = ?,
                refresh_token = COALESCE(?, refresh_token),
                token_expires_at = ?
            WHERE id = ?
            "#,
            params![
                access_token,
                refresh_token,
                expires_at.map(|t| format_datetime(&t)),
                id
            ],
        )?;
        Ok(())
    }

    fn row_to_mail_account(row: &rusqlite::Row) -> rusqlite::Result<MailAccount> {
        let expires_str: Option<String> = row.get(6)?;
        let status_str: String = row.get(8)?;
        let last_sync_str: Option<String> = row.get(9)?;
        let created_at_str: String = row.get(13)?;

        Ok(MailAccount {
            id: row.get(0)?,
            provider: row.get(1)?,
            provider_account_id: row.get(2)?,
            email: row.get(3)?,
            access_token: row.get(4)?,
            refresh_token: row.get(5)?,
            token_expires_at: expires_str.map(|s| parse_datetime(&s)),
            sync_enabled: row.get(7)?,
            sync_status: status_str.parse().unwrap_or(SyncStatus::Error),
            last_sync_date: last_sync_str.map(|s| parse_datetime(&s)),
            sync_range_months: row.get(10)?,
            sync_page_token: row.get(11)?,
            last_sync_error: row.get(12)?,
            created_at: parse_datetime(&created_at_str),
        })
    }
}
