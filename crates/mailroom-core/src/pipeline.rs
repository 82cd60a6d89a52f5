//! Post-sync processing for newly stored messages
//!
//! Every automation config that owns the message's account gets its rules
//! evaluated. Financial detection then runs once for all owning configs that
//! enable it. Failures are logged and never abort the sync that triggered them.

use serde::Serialize;
use tracing::{debug, warn};

use crate::automation::{ActionOutcome, DatabaseActionExecutor, MessageView, RuleEngine};
use crate::db::Database;
use crate::error::Result;
use crate::financial::FinancialDetector;
use crate::models::{Attachment, FinancialSuggestion, Message};

/// What automation did with one message
#[derive(Debug, Default, Serialize)]
pub struct PipelineReport {
    pub actions: Vec<ActionOutcome>,
    pub suggestions: Vec<FinancialSuggestion>,
    pub errors: Vec<String>,
}

pub struct MessagePipeline {
    db: Database,
    engine: RuleEngine<DatabaseActionExecutor>,
    detector: FinancialDetector,
}

impl MessagePipeline {
    pub fn new(db: Database, detector: FinancialDetector) -> Self {
        Self {
            engine: RuleEngine::new(DatabaseActionExecutor::new(db.clone())),
            db,
            detector,
        }
    }

    pub fn detector(&self) -> &FinancialDetector {
        &self.detector
    }

    /// Run rules and detection for a message that was just stored
    pub async fn process(
        &self,
        message: &Message,
        body: Option<&str>,
        attachments: &[Attachment],
    ) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();
        let configs = self.db.configs_for_account(message.account_id)?;
        if configs.is_empty() {
            return Ok(report);
        }

        let view = MessageView::from_message(message, body, attachments);

        for config in &configs {
            match self.db.list_rules_for_config(config.id) {
                Ok(rules) => {
                    report
                        .actions
                        .extend(self.engine.evaluate(config, &view, &rules));
                }
                Err(e) => {
                    warn!(module = %config.module, error = %e, "Could not load automation rules");
                    report.errors.push(format!("{}: {}", config.module, e));
                }
            }
        }

        // After every module's rules, so operations they create get linked
        match self
            .detector
            .detect_for_configs(message, attachments, &configs)
            .await
        {
            Ok(found) => report.suggestions.extend(found),
            Err(e) => {
                warn!(message_id = message.id, error = %e, "Financial detection failed");
                report.errors.push(format!("detection: {}", e));
            }
        }

        debug!(
            message_id = message.id,
            actions = report.actions.len(),
            suggestions = report.suggestions.len(),
            "Automation pipeline finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::models::*;
    use crate::store::{ContentStore, MemoryBackend};
    use chrono::Utc;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_rules_and_detection_for_owning_configs_only() {
        let db = Database::in_memory().unwrap();
        let store = ContentStore::new(db.clone(), Arc::new(MemoryBackend::new()));
        let detector = FinancialDetector::new(
            db.clone(),
            store.clone(),
            Arc::new(CircuitBreaker::new(Default::default())),
            None,
        );
        let pipeline = MessagePipeline::new(db.clone(), detector);

        let account_id = db
            .upsert_mail_account(&NewMailAccount {
                provider: "mock".to_string(),
                provider_account_id: "ops".to_string(),
                email: "ops@forwarder.example".to_string(),
                access_token: "t".to_string(),
                refresh_token: None,
                token_expires_at: None,
                sync_range_months: 3,
            })
            .unwrap();

        db.upsert_automation_config(
            "operations",
            &AutomationConfigUpdate {
                ai_optimization_level: AiOptimizationLevel::HeuristicOnly,
                auto_detect_expenses: true,
                selected_account_ids: vec![account_id],
                ..Default::default()
            },
        )
        .unwrap();
        // Not subscribed to this account
        db.upsert_automation_config(
            "finance",
            &AutomationConfigUpdate {
                auto_detect_expenses: true,
                ..Default::default()
            },
        )
        .unwrap();

        crate::automation::create_rule(
            &db,
            "operations",
            &RuleDefinition {
                name: "Booking".to_string(),
                conditions: vec![Condition {
                    field: ConditionField::Subject,
                    operator: ConditionOperator::Contains,
                    value: "booking".to_string(),
                }],
                actions: vec![RuleAction::CreateOperation {
                    reference_pattern: r"NAVI-\d+".to_string(),
                    title_template: Some("{subject}".to_string()),
                }],
                priority: 0,
                is_enabled: true,
            },
        )
        .unwrap();

        let id = db
            .upsert_message(&NewMessage {
                account_id,
                provider_message_id: "p1".to_string(),
                thread_id: None,
                sender: "carrier@lines.example".to_string(),
                subject: "Booking NAVI-2001 invoice".to_string(),
                snippet: String::new(),
                received_at: Utc::now(),
                is_read: false,
                has_attachments: false,
            })
            .unwrap()
            .id();
        let body = "Freight charges\nAmount due: USD 1,480.00";
        let hash = store.put(body.as_bytes()).await.unwrap().hash;
        db.set_message_body_hash(id, &hash).unwrap();
        let message = db.get_message(id).unwrap().unwrap();

        let report = pipeline.process(&message, Some(body), &[]).await.unwrap();
        assert!(report.errors.is_empty());
        assert_eq!(report.actions.len(), 1);
        assert_eq!(report.actions[0].outcome, LogOutcome::Success);
        assert!(db.get_operation_by_reference("NAVI-2001").unwrap().is_some());

        assert_eq!(report.suggestions.len(), 1);
        assert_eq!(report.suggestions[0].amount_cents, 148_000);
        // Operation created by the rule is linked by the detector that runs after it
        assert!(report.suggestions[0].operation_id.is_some());
    }

    #[tokio::test]
    async fn test_no_configs_is_a_no_op() {
        let db = Database::in_memory().unwrap();
        let store = ContentStore::new(db.clone(), Arc::new(MemoryBackend::new()));
        let detector = FinancialDetector::new(
            db.clone(),
            store,
            Arc::new(CircuitBreaker::new(Default::default())),
            None,
        );
        let pipeline = MessagePipeline::new(db.clone(), detector);
        let message = Message {
            id: 1,
            account_id: 42,
            provider_message_id: "x".to_string(),
            thread_id: None,
            sender: "a@b.example".to_string(),
            subject: "Invoice".to_string(),
            snippet: String::new(),
            received_at: Utc::now(),
            is_read: false,
            has_attachments: false,
            body_content_hash: None,
            is_spam_filtered: false,
            spam_reason: None,
            created_at: Utc::now(),
        };
        let report = pipeline.process(&message, None, &[]).await.unwrap();
        assert!(report.actions.is_empty());
        assert!(report.suggestions.is_empty());
    }
}
