//! Operations, tasks, notes, and notifications created by automation actions

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::Operation;

impl Database {
    /// Create an operation, or return the existing one with the same reference
    ///
    /// The bool is true when a new row was created.
    pub fn create_operation(
        &self,
        reference: &str,
        title: &str,
        source_message_id: Option<i64>,
    ) -> Result<(i64, bool)> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO operations (reference, title, source_message_id) VALUES (?, ?, ?)",
            params![reference, title, source_message_id],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM operations WHERE reference = ?",
            params![reference],
            |row| row.get(0),
        )?;
        Ok((id, inserted == 1))
    }

    pub fn get_operation_by_reference(&self, reference: &str) -> Result<Option<Operation>> {
        let conn = self.conn()?;
        let op = conn
            .query_row(
                "SELECT id, reference, title, source_message_id, created_at
                 FROM operations WHERE reference = ?",
                params![reference],
                Self::row_to_operation,
            )
            .optional()?;
        Ok(op)
    }

    /// Find the operation whose reference appears in the given text
    ///
    /// Longest reference wins so `NAVI-1001` beats `NAVI-1`.
    pub fn find_operation_in_text(&self, text: &str) -> Result<Option<Operation>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let conn = self.conn()?;
        let op = conn
            .query_row(
                r#"
                SELECT id, reference, title, source_message_id, created_at
                FROM operations
                WHERE instr(lower(?), lower(reference)) > 0
                ORDER BY length(reference) DESC, id ASC
                LIMIT 1
                "#,
                params![text],
                Self::row_to_operation,
            )
            .optional()?;
        Ok(op)
    }

    pub fn list_operations(&self) -> Result<Vec<Operation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, reference, title, source_message_id, created_at
             FROM operations ORDER BY id",
        )?;
        let ops = stmt
            .query_map([], Self::row_to_operation)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ops)
    }

    pub fn create_task(
        &self,
        title: &str,
        assignee_employee_id: Option<i64>,
        source_message_id: Option<i64>,
        rule_id: Option<i64>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tasks (title, assignee_employee_id, source_message_id, rule_id)
             VALUES (?, ?, ?, ?)",
            params![title, assignee_employee_id, source_message_id, rule_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn create_note(
        &self,
        body: &str,
        source_message_id: Option<i64>,
        rule_id: Option<i64>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO notes (body, source_message_id, rule_id) VALUES (?, ?, ?)",
            params![body, source_message_id, rule_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn create_notification(
        &self,
        message: &str,
        source_message_id: Option<i64>,
        rule_id: Option<i64>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO notifications (message, source_message_id, rule_id) VALUES (?, ?, ?)",
            params![message, source_message_id, rule_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn row_to_operation(row: &rusqlite::Row) -> rusqlite::Result<Operation> {
        let created_at_str: String = row.get(4)?;
        Ok(Operation {
            id: row.get(0)?,
            reference: row.get(1)?,
            title: row.get(2)?,
            source_message_id: row.get(3)?,
            created_at: parse_datetime(&created_at_str),
        })
    }
}
