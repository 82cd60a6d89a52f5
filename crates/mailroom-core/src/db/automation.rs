//! Automation config, rule, and log operations

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::*;

const CONFIG_COLUMNS: &str = "id, module, is_enabled, process_attachments, auto_create_tasks,
     auto_create_notes, ai_optimization_level, auto_detect_payments, auto_detect_expenses,
     duplicate_window_days, selected_account_ids, selected_employee_ids, updated_at";

const RULE_COLUMNS: &str =
    "id, config_id, name, conditions, actions, priority, is_enabled, created_at";

fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

impl Database {
    /// Create or replace a module's automation config
    pub fn upsert_automation_config(
        &self,
        module: &str,
        update: &AutomationConfigUpdate,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO automation_configs (module, is_enabled, process_attachments,
                auto_create_tasks, auto_create_notes, ai_optimization_level,
                auto_detect_payments, auto_detect_expenses, duplicate_window_days,
                selected_account_ids, selected_employee_ids)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(module) DO UPDATE SET
                is_enabled = excluded.is_enabled,
                process_attachments = excluded.process_attachments,
                auto_create_tasks = excluded.auto_create_tasks,
                auto_create_notes = excluded.auto_create_notes,
                ai_optimization_level = excluded.ai_optimization_level,
                auto_detect_payments = excluded.auto_detect_payments,
                auto_detect_expenses = excluded.auto_detect_expenses,
                duplicate_window_days = excluded.duplicate_window_days,
                selected_account_ids = excluded.selected_account_ids,
                selected_employee_ids = excluded.selected_employee_ids,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![
                module,
                update.is_enabled,
                update.process_attachments,
                update.auto_create_tasks,
                update.auto_create_notes,
                update.ai_optimization_level.as_str(),
                update.auto_detect_payments,
                update.auto_detect_expenses,
                update.duplicate_window_days.max(0),
                serde_json::to_string(&update.selected_account_ids)?,
                serde_json::to_string(&update.selected_employee_ids)?,
            ],
        )?;

        let id = conn.query_row(
            "SELECT id FROM automation_configs WHERE module = ?",
            params![module],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_automation_config(&self, module: &str) -> Result<Option<AutomationConfig>> {
        let conn = self.conn()?;
        let config = conn
            .query_row(
                &format!(
                    "SELECT {} FROM automation_configs WHERE module = ?",
                    CONFIG_COLUMNS
                ),
                params![module],
                Self::row_to_config,
            )
            .optional()?;
        Ok(config)
    }

    pub fn list_automation_configs(&self) -> Result<Vec<AutomationConfig>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM automation_configs ORDER BY module",
            CONFIG_COLUMNS
        ))?;

        let configs = stmt
            .query_map([], Self::row_to_config)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(configs)
    }

    /// Enabled configs whose account selection includes this account
    pub fn configs_for_account(&self, account_id: i64) -> Result<Vec<AutomationConfig>> {
        Ok(self
            .list_automation_configs()?
            .into_iter()
            .filter(|c| c.is_enabled && c.owns_account(account_id))
            .collect())
    }

    /// Store an already-validated rule
    pub(crate) fn insert_automation_rule(
        &self,
        config_id: i64,
        rule: &RuleDefinition,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO automation_rules (config_id, name, conditions, actions, priority, is_enabled)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                config_id,
                rule.name,
                serde_json::to_string(&rule.conditions)?,
                serde_json::to_string(&rule.actions)?,
                rule.priority,
                rule.is_enabled,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Rules for a config in evaluation order: priority descending, then creation order
    pub fn list_rules_for_config(&self, config_id: i64) -> Result<Vec<AutomationRule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM automation_rules WHERE config_id = ? ORDER BY priority DESC, id ASC",
            RULE_COLUMNS
        ))?;

        let rules = stmt
            .query_map(params![config_id], Self::row_to_rule)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rules)
    }

    pub fn get_automation_rule(&self, id: i64) -> Result<Option<AutomationRule>> {
        let conn = self.conn()?;
        let rule = conn
            .query_row(
                &format!("SELECT {} FROM automation_rules WHERE id = ?", RULE_COLUMNS),
                params![id],
                Self::row_to_rule,
            )
            .optional()?;
        Ok(rule)
    }

    pub fn set_rule_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE automation_rules SET is_enabled = ? WHERE id = ?",
            params![enabled, id],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_automation_rule(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM automation_rules WHERE id = ?", params![id])?;
        Ok(deleted > 0)
    }

    /// Append an automation log entry
    pub fn append_automation_log(&self, log: &NewAutomationLog) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO automation_logs (rule_id, message_id, action_type, outcome,
                                         error_message, details)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                log.rule_id,
                log.message_id,
                log.action_type,
                log.outcome.as_str(),
                log.error_message,
                log.details.to_string(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List automation logs, newest first
    pub fn list_automation_logs(
        &self,
        rule_id: Option<i64>,
        message_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<AutomationLog>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, rule_id, message_id, action_type, outcome, error_message, details, created_at
            FROM automation_logs
            WHERE (?1 IS NULL OR rule_id = ?1) AND (?2 IS NULL OR message_id = ?2)
            ORDER BY id DESC
            LIMIT ?3
            "#,
        )?;

        let logs = stmt
            .query_map(params![rule_id, message_id, limit], |row| {
                let outcome_str: String = row.get(4)?;
                let details_str: String = row.get(6)?;
                let created_at_str: String = row.get(7)?;
                Ok(AutomationLog {
                    id: row.get(0)?,
                    rule_id: row.get(1)?,
                    message_id: row.get(2)?,
                    action_type: row.get(3)?,
                    outcome: outcome_str.parse().unwrap_or(LogOutcome::Error),
                    error_message: row.get(5)?,
                    details: serde_json::from_str(&details_str)
                        .unwrap_or(serde_json::Value::Null),
                    created_at: parse_datetime(&created_at_str),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(logs)
    }

    fn row_to_config(row: &rusqlite::Row) -> rusqlite::Result<AutomationConfig> {
        let level_str: String = row.get(6)?;
        let updated_at_str: String = row.get(12)?;

        Ok(AutomationConfig {
            id: row.get(0)?,
            module: row.get(1)?,
            is_enabled: row.get(2)?,
            process_attachments: row.get(3)?,
            auto_create_tasks: row.get(4)?,
            auto_create_notes: row.get(5)?,
            ai_optimization_level: level_str.parse().unwrap_or_default(),
            auto_detect_payments: row.get(7)?,
            auto_detect_expenses: row.get(8)?,
            duplicate_window_days: row.get(9)?,
            selected_account_ids: json_column(row, 10)?,
            selected_employee_ids: json_column(row, 11)?,
            updated_at: parse_datetime(&updated_at_str),
        })
    }

    fn row_to_rule(row: &rusqlite::Row) -> rusqlite::Result<AutomationRule> {
        let created_at_str: String = row.get(7)?;

        Ok(AutomationRule {
            id: row.get(0)?,
            config_id: row.get(1)?,
            name: row.get(2)?,
            conditions: json_column(row, 3)?,
            actions: json_column(row, 4)?,
            priority: row.get(5)?,
            is_enabled: row.get(6)?,
            created_at: parse_datetime(&created_at_str),
        })
    }
}
