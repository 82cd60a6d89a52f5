//! Financial suggestion operations
//!
//! Duplicate checking and insertion share one `BEGIN IMMEDIATE` transaction so two
//! concurrent detections can't both conclude "not a duplicate". Review
//! transitions are guarded by `WHERE status = 'pending'`.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use super::{format_datetime, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::*;

const SUGGESTION_COLUMNS: &str = "id, kind, amount_cents, currency, description, document_date,
     ai_confidence, extraction_method, status, is_duplicate, duplicate_reason,
     related_suggestion_id, operation_id, source_message_id, source_attachment_id,
     rejection_reason, reviewed_by, reviewed_at, created_at";

/// Filter for listing suggestions
#[derive(Debug, Clone, Default)]
pub struct SuggestionFilter {
    pub status: Option<SuggestionStatus>,
    pub operation_id: Option<i64>,
    pub limit: Option<i64>,
}

impl Database {
    /// Insert a suggestion, flagging it when it duplicates an open or approved one
    ///
    /// A duplicate has the same operation (or both have none), type, amount in cents,
    /// and currency, with document dates at most `window_days` apart. Suggestions
    /// without a document date are compared by creation date.
    pub fn insert_suggestion_checked(
        &self,
        new: &NewFinancialSuggestion,
        window_days: i64,
    ) -> Result<FinancialSuggestion> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let effective_date = new
            .document_date
            .unwrap_or_else(|| Utc::now().date_naive());
        let currency = new.currency.to_uppercase();

        let existing: Option<(i64, Option<String>, String)> = tx
            .query_row(
                r#"
                SELECT id, document_date, status
                FROM financial_suggestions
                WHERE status IN ('pending', 'approved')
                  AND kind = ?1
                  AND amount_cents = ?2
                  AND upper(currency) = ?3
                  AND operation_id IS ?4
                  AND abs(julianday(COALESCE(document_date, date(created_at))) - julianday(?5)) <= ?6
                ORDER BY is_duplicate ASC, id ASC
                LIMIT 1
                "#,
                params![
                    new.kind.as_str(),
                    new.amount_cents,
                    currency,
                    new.operation_id,
                    effective_date.to_string(),
                    window_days.max(0),
                ],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (is_duplicate, duplicate_reason, related_id) = match existing {
            Some((id, date, status)) => {
                let reason = format!(
                    "Same {} of {:.2} {} as suggestion #{} ({}, dated {}) within {} days",
                    new.kind,
                    new.amount_cents as f64 / 100.0,
                    currency,
                    id,
                    status,
                    date.as_deref().unwrap_or("unknown"),
                    window_days
                );
                (true, Some(reason), Some(id))
            }
            None => (false, None, None),
        };

        tx.execute(
            r#"
            INSERT INTO financial_suggestions (kind, amount_cents, currency, description,
                document_date, ai_confidence, extraction_method, is_duplicate, duplicate_reason,
                related_suggestion_id, operation_id, source_message_id, source_attachment_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                new.kind.as_str(),
                new.amount_cents,
                currency,
                new.description,
                new.document_date.map(|d| d.to_string()),
                new.ai_confidence.clamp(0, 100),
                new.extraction_method.as_str(),
                is_duplicate,
                duplicate_reason,
                related_id,
                new.operation_id,
                new.source_message_id,
                new.source_attachment_id,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        self.get_suggestion(id)?
            .ok_or_else(|| Error::NotFound(format!("suggestion {}", id)))
    }

    pub fn get_suggestion(&self, id: i64) -> Result<Option<FinancialSuggestion>> {
        let conn = self.conn()?;
        let suggestion = conn
            .query_row(
                &format!(
                    "SELECT {} FROM financial_suggestions WHERE id = ?",
                    SUGGESTION_COLUMNS
                ),
                params![id],
                Self::row_to_suggestion,
            )
            .optional()?;
        Ok(suggestion)
    }

    /// List suggestions, newest first
    pub fn list_suggestions(&self, filter: &SuggestionFilter) -> Result<Vec<FinancialSuggestion>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM financial_suggestions
            WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR operation_id = ?2)
            ORDER BY id DESC
            LIMIT ?3
            "#,
            SUGGESTION_COLUMNS
        ))?;

        let suggestions = stmt
            .query_map(
                params![
                    filter.status.map(|s| s.as_str()),
                    filter.operation_id,
                    filter.limit.unwrap_or(200),
                ],
                Self::row_to_suggestion,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(suggestions)
    }

    /// Approve a pending suggestion and create its downstream record
    pub fn approve_suggestion(&self, id: i64, reviewer: &str) -> Result<FinancialSuggestion> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let updated = tx.execute(
            r#"
            UPDATE financial_suggestions
            SET status = 'approved', reviewed_by = ?, reviewed_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
            params![reviewer, format_datetime(&Utc::now()), id],
        )?;
        if updated == 0 {
            return Err(Self::review_conflict(&tx, id)?);
        }

        tx.execute(
            r#"
            INSERT INTO financial_records (suggestion_id, kind, amount_cents, currency, operation_id)
            SELECT id, kind, amount_cents, currency, operation_id
            FROM financial_suggestions WHERE id = ?
            "#,
            params![id],
        )?;
        tx.commit()?;

        self.get_suggestion(id)?
            .ok_or_else(|| Error::NotFound(format!("suggestion {}", id)))
    }

    /// Reject a pending suggestion with an optional reason
    pub fn reject_suggestion(
        &self,
        id: i64,
        reviewer: &str,
        reason: Option<&str>,
    ) -> Result<FinancialSuggestion> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let updated = tx.execute(
            r#"
            UPDATE financial_suggestions
            SET status = 'rejected', rejection_reason = ?, reviewed_by = ?, reviewed_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
            params![reason, reviewer, format_datetime(&Utc::now()), id],
        )?;
        if updated == 0 {
            return Err(Self::review_conflict(&tx, id)?);
        }
        tx.commit()?;

        self.get_suggestion(id)?
            .ok_or_else(|| Error::NotFound(format!("suggestion {}", id)))
    }

    pub fn get_financial_record_for_suggestion(
        &self,
        suggestion_id: i64,
    ) -> Result<Option<FinancialRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT id, suggestion_id, kind, amount_cents, currency, operation_id, created_at
                 FROM financial_records WHERE suggestion_id = ?",
                params![suggestion_id],
                |row| {
                    let kind_str: String = row.get(2)?;
                    let created_at_str: String = row.get(6)?;
                    Ok(FinancialRecord {
                        id: row.get(0)?,
                        suggestion_id: row.get(1)?,
                        kind: kind_str.parse().unwrap_or(SuggestionKind::Expense),
                        amount_cents: row.get(3)?,
                        currency: row.get(4)?,
                        operation_id: row.get(5)?,
                        created_at: parse_datetime(&created_at_str),
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Build the error for a review transition that matched no pending row
    fn review_conflict(conn: &rusqlite::Connection, id: i64) -> Result<Error> {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM financial_suggestions WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match status {
            Some(status) => Error::Conflict(format!(
                "suggestion {} is already {} and can no longer be reviewed",
                id, status
            )),
            None => Error::NotFound(format!("suggestion {}", id)),
        })
    }

    fn row_to_suggestion(row: &rusqlite::Row) -> rusqlite::Result<FinancialSuggestion> {
        let kind_str: String = row.get(1)?;
        let amount_cents: i64 = row.get(2)?;
        let date_str: Option<String> = row.get(5)?;
        let method_str: String = row.get(7)?;
        let status_str: String = row.get(8)?;
        let reviewed_at_str: Option<String> = row.get(17)?;
        let created_at_str: String = row.get(18)?;

        Ok(FinancialSuggestion {
            id: row.get(0)?,
            kind: kind_str.parse().unwrap_or(SuggestionKind::Expense),
            amount: amount_cents as f64 / 100.0,
            amount_cents,
            currency: row.get(3)?,
            description: row.get(4)?,
            document_date: date_str.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
            ai_confidence: row.get(6)?,
            extraction_method: method_str.parse().unwrap_or_default(),
            status: status_str.parse().unwrap_or_default(),
            is_duplicate: row.get(9)?,
            duplicate_reason: row.get(10)?,
            related_suggestion_id: row.get(11)?,
            operation_id: row.get(12)?,
            source_message_id: row.get(13)?,
            source_attachment_id: row.get(14)?,
            rejection_reason: row.get(15)?,
            reviewed_by: row.get(16)?,
            reviewed_at: reviewed_at_str.map(|s| parse_datetime(&s)),
            created_at: parse_datetime(&created_at_str),
        })
    }
}
