//! Message and attachment operations

use rusqlite::{params, OptionalExtension};

use super::{format_datetime, parse_datetime, Database};
use crate::error::Result;
use crate::models::{Attachment, Message, NewMessage};

const MESSAGE_COLUMNS: &str = "id, account_id, provider_message_id, thread_id, sender, subject,
     snippet, received_at, is_read, has_attachments, body_content_hash, is_spam_filtered,
     spam_reason, created_at";

/// Result of an idempotent message upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageInsertResult {
    /// First time this (account, provider id) pair was seen
    Inserted(i64),
    /// Row already existed and was fully processed
    Existing(i64),
    /// Row already existed but an earlier sync stopped before finishing it
    Unfinished(i64),
}

impl MessageInsertResult {
    pub fn id(&self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Existing(id) | Self::Unfinished(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }

    /// Whether the follow-up work for this row still has to run
    pub fn needs_processing(&self) -> bool {
        !matches!(self, Self::Existing(_))
    }
}

/// Attachment row to record after its bytes are in the content store
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub message_id: i64,
    pub provider_attachment_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    pub content_hash: String,
}

impl Database {
    /// Insert a message unless (account_id, provider_message_id) already exists
    pub fn upsert_message(&self, msg: &NewMessage) -> Result<MessageInsertResult> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            r#"
            INSERT INTO messages (account_id, provider_message_id, thread_id, sender, subject,
                                  snippet, received_at, is_read, has_attachments)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id, provider_message_id) DO NOTHING
            "#,
            params![
                msg.account_id,
                msg.provider_message_id,
                msg.thread_id,
                msg.sender,
                msg.subject,
                msg.snippet,
                format_datetime(&msg.received_at),
                msg.is_read,
                msg.has_attachments,
            ],
        )?;

        if inserted == 1 {
            return Ok(MessageInsertResult::Inserted(conn.last_insert_rowid()));
        }

        let (id, processed): (i64, bool) = conn.query_row(
            "SELECT id, processed_at IS NOT NULL FROM messages
             WHERE account_id = ? AND provider_message_id = ?",
            params![msg.account_id, msg.provider_message_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if processed {
            Ok(MessageInsertResult::Existing(id))
        } else {
            Ok(MessageInsertResult::Unfinished(id))
        }
    }

    /// Mark a message as fully handled by sync
    pub fn mark_message_processed(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE messages SET processed_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![id],
        )?;
        Ok(())
    }

    /// Record that the spam classifier dropped this message
    pub fn mark_message_filtered(&self, id: i64, reason: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE messages SET is_spam_filtered = 1, spam_reason = ? WHERE id = ?",
            params![reason, id],
        )?;
        Ok(())
    }

    pub fn set_message_body_hash(&self, id: i64, hash: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE messages SET body_content_hash = ? WHERE id = ?",
            params![hash, id],
        )?;
        Ok(())
    }

    pub fn set_message_read(&self, id: i64, is_read: bool) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE messages SET is_read = ? WHERE id = ?",
            params![is_read, id],
        )?;
        Ok(updated > 0)
    }

    pub fn get_message(&self, id: i64) -> Result<Option<Message>> {
        let conn = self.conn()?;
        let message = conn
            .query_row(
                &format!("SELECT {} FROM messages WHERE id = ?", MESSAGE_COLUMNS),
                params![id],
                Self::row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// List messages for an account, newest first
    pub fn list_messages(
        &self,
        account_id: i64,
        include_filtered: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM messages
            WHERE account_id = ? AND (? OR is_spam_filtered = 0)
            ORDER BY received_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
            MESSAGE_COLUMNS
        ))?;

        let messages = stmt
            .query_map(
                params![account_id, include_filtered, limit, offset],
                Self::row_to_message,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(messages)
    }

    pub fn count_messages(&self, account_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE account_id = ?",
            params![account_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Record an attachment; re-recording the same provider attachment is a no-op
    pub fn insert_attachment(&self, attachment: &NewAttachment) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO attachments (message_id, provider_attachment_id, filename, mime_type,
                                     size, content_hash)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(message_id, provider_attachment_id) DO NOTHING
            "#,
            params![
                attachment.message_id,
                attachment.provider_attachment_id,
                attachment.filename,
                attachment.mime_type,
                attachment.size,
                attachment.content_hash,
            ],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM attachments WHERE message_id = ? AND provider_attachment_id = ?",
            params![attachment.message_id, attachment.provider_attachment_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_attachments_for_message(&self, message_id: i64) -> Result<Vec<Attachment>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, message_id, filename, mime_type, size, content_hash, created_at
             FROM attachments WHERE message_id = ? ORDER BY id",
        )?;

        let attachments = stmt
            .query_map(params![message_id], |row| {
                let created_at_str: String = row.get(6)?;
                Ok(Attachment {
                    id: row.get(0)?,
                    message_id: row.get(1)?,
                    filename: row.get(2)?,
                    mime_type: row.get(3)?,
                    size: row.get(4)?,
                    content_hash: row.get(5)?,
                    created_at: parse_datetime(&created_at_str),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(attachments)
    }

    /// Number of attachment rows referencing a content hash
    pub fn count_attachments_with_hash(&self, hash: &str) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM attachments WHERE content_hash = ?",
            params![hash],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
        let received_str: String = row.get(7)?;
        let created_at_str: String = row.get(13)?;

        Ok(Message {
            id: row.get(0)?,
            account_id: row.get(1)?,
            provider_message_id: row.get(2)?,
            thread_id: row.get(3)?,
            sender: row.get(4)?,
            subject: row.get(5)?,
            snippet: row.get(6)?,
            received_at: parse_datetime(&received_str),
            is_read: row.get(8)?,
            has_attachments: row.get(9)?,
            body_content_hash: row.get(10)?,
            is_spam_filtered: row.get(11)?,
            spam_reason: row.get(12)?,
            created_at: parse_datetime(&created_at_str),
        })
    }
}
