//! Content store index operations

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::{BlobLocation, BlobRecord};

impl Database {
    /// Record that a blob lives in the backend
    ///
    /// Returns true if this call created the index row; false means another
    /// writer (or an earlier call) already recorded the same hash.
    pub fn record_blob(&self, hash: &str, size: i64) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO blobs (hash, size, location) VALUES (?, ?, 'backend')",
            params![hash, size],
        )?;
        Ok(inserted == 1)
    }

    /// Store blob bytes inline (backend unreachable)
    pub fn record_inline_blob(&self, hash: &str, data: &[u8]) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO blobs (hash, size, location, inline_data) VALUES (?, ?, 'inline', ?)",
            params![hash, data.len() as i64, data],
        )?;
        Ok(inserted == 1)
    }

    pub fn get_blob_record(&self, hash: &str) -> Result<Option<BlobRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT hash, size, location, created_at FROM blobs WHERE hash = ?",
                params![hash],
                |row| {
                    let location_str: String = row.get(2)?;
                    let created_at_str: String = row.get(3)?;
                    Ok(BlobRecord {
                        hash: row.get(0)?,
                        size: row.get(1)?,
                        location: location_str.parse().unwrap_or_default(),
                        created_at: parse_datetime(&created_at_str),
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Inline bytes for a blob stored in the fallback path
    pub fn get_inline_blob(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let data: Option<Option<Vec<u8>>> = conn
            .query_row(
                "SELECT inline_data FROM blobs WHERE hash = ? AND location = ?",
                params![hash, BlobLocation::Inline.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data.flatten())
    }

    /// Count blobs by location: (backend, inline)
    pub fn count_blobs(&self) -> Result<(i64, i64)> {
        let conn = self.conn()?;
        let counts = conn.query_row(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN location = 'backend' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN location = 'inline' THEN 1 ELSE 0 END), 0)
            FROM blobs
            "#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(counts)
    }
}
