//! Automation rule engine
//!
//! Rules are validated and compiled when they are created, so evaluation never
//! sees an unknown field/operator pairing or a bad regex. Every enabled rule
//! whose conditions all hold fires, in priority order (ties by creation order),
//! and each action is executed and logged on its own: a failing action never
//! stops the ones after it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{
    sender_domain, Attachment, AutomationConfig, AutomationRule, Condition, ConditionField,
    ConditionOperator, LogOutcome, Message, NewAutomationLog, RuleAction, RuleDefinition,
};

const TEMPLATE_PLACEHOLDERS: &[&str] = &["subject", "sender", "reference"];

fn re_placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^{}]*)\}").expect("valid regex"))
}

// ============================================================================
// Message view
// ============================================================================

/// The message attributes rules can inspect
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageView {
    pub message_id: Option<i64>,
    pub sender: String,
    pub subject: String,
    pub snippet: String,
    pub body: String,
    /// Names of attachments that were fetched and stored
    pub attachment_names: Vec<String>,
    /// The provider reported attachments, whether or not they were fetched
    pub has_attachments: bool,
}

impl MessageView {
    pub fn from_message(message: &Message, body: Option<&str>, attachments: &[Attachment]) -> Self {
        Self {
            message_id: Some(message.id),
            sender: message.sender.clone(),
            subject: message.subject.clone(),
            snippet: message.snippet.clone(),
            body: body.unwrap_or_default().to_string(),
            attachment_names: attachments.iter().map(|a| a.filename.clone()).collect(),
            has_attachments: message.has_attachments || !attachments.is_empty(),
        }
    }

    /// View for a message that was never stored (dry runs)
    pub fn adhoc(sender: &str, subject: &str) -> Self {
        Self {
            sender: sender.to_string(),
            subject: subject.to_string(),
            ..Self::default()
        }
    }

    fn text(&self, field: ConditionField) -> Vec<String> {
        match field {
            ConditionField::Subject => vec![self.subject.clone()],
            ConditionField::Sender => vec![self.sender.clone()],
            ConditionField::SenderDomain => vec![sender_domain(&self.sender)],
            ConditionField::Snippet => vec![self.snippet.clone()],
            ConditionField::Body => vec![self.body.clone()],
            ConditionField::AttachmentName => self.attachment_names.clone(),
            ConditionField::HasAttachments => Vec::new(),
        }
    }
}

// ============================================================================
// Compilation
// ============================================================================

#[derive(Debug, Clone)]
enum Matcher {
    Text {
        operator: ConditionOperator,
        needle: String,
    },
    Regex(Regex),
    Flag(bool),
}

#[derive(Debug, Clone)]
struct CompiledCondition {
    field: ConditionField,
    matcher: Matcher,
}

impl CompiledCondition {
    fn compile(condition: &Condition) -> Result<Self> {
        let field_name = format!("{:?}", condition.field);
        if condition.field.is_boolean() != condition.operator.is_boolean() {
            return Err(Error::InvalidRule(format!(
                "operator {:?} cannot be applied to field {}",
                condition.operator, field_name
            )));
        }

        let matcher = match condition.operator {
            ConditionOperator::IsTrue => Matcher::Flag(true),
            ConditionOperator::IsFalse => Matcher::Flag(false),
            ConditionOperator::MatchesRegex => Matcher::Regex(Regex::new(&condition.value).map_err(
                |e| Error::InvalidRule(format!("invalid regex {:?}: {}", condition.value, e)),
            )?),
            operator => {
                if condition.value.trim().is_empty() {
                    return Err(Error::InvalidRule(format!(
                        "condition on {} needs a value",
                        field_name
                    )));
                }
                Matcher::Text {
                    operator,
                    needle: condition.value.to_lowercase(),
                }
            }
        };

        Ok(Self {
            field: condition.field,
            matcher,
        })
    }

    fn matches(&self, view: &MessageView) -> bool {
        match &self.matcher {
            Matcher::Flag(expected) => view.has_attachments == *expected,
            Matcher::Regex(re) => view.text(self.field).iter().any(|v| re.is_match(v)),
            Matcher::Text { operator, needle } => {
                let values: Vec<String> = view
                    .text(self.field)
                    .into_iter()
                    .map(|v| v.to_lowercase())
                    .collect();
                match operator {
                    ConditionOperator::NotContains => {
                        values.iter().all(|v| !v.contains(needle.as_str()))
                    }
                    ConditionOperator::Contains => values.iter().any(|v| v.contains(needle.as_str())),
                    ConditionOperator::Equals => values.iter().any(|v| v == needle),
                    ConditionOperator::StartsWith => {
                        values.iter().any(|v| v.starts_with(needle.as_str()))
                    }
                    ConditionOperator::EndsWith => {
                        values.iter().any(|v| v.ends_with(needle.as_str()))
                    }
                    _ => false,
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
enum CompiledAction {
    CreateOperation {
        pattern: Regex,
        title_template: Option<String>,
    },
    CreateTask {
        title_template: String,
        assignee_employee_id: Option<i64>,
    },
    CreateNote {
        text_template: String,
    },
    Notify {
        message_template: String,
    },
}

fn check_template(template: &str, what: &str) -> Result<()> {
    if template.trim().is_empty() {
        return Err(Error::InvalidRule(format!("{} must not be empty", what)));
    }
    for cap in re_placeholder().captures_iter(template) {
        if !TEMPLATE_PLACEHOLDERS.contains(&&cap[1]) {
            return Err(Error::InvalidRule(format!(
                "unknown placeholder {{{}}} in {}",
                &cap[1], what
            )));
        }
    }
    Ok(())
}

impl CompiledAction {
    fn compile(action: &RuleAction) -> Result<Self> {
        Ok(match action {
            RuleAction::CreateOperation {
                reference_pattern,
                title_template,
            } => {
                if reference_pattern.trim().is_empty() {
                    return Err(Error::InvalidRule(
                        "create_operation needs a reference_pattern".to_string(),
                    ));
                }
                let pattern = RegexBuilder::new(reference_pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        Error::InvalidRule(format!(
                            "invalid reference_pattern {:?}: {}",
                            reference_pattern, e
                        ))
                    })?;
                if let Some(t) = title_template {
                    check_template(t, "title_template")?;
                }
                Self::CreateOperation {
                    pattern,
                    title_template: title_template.clone(),
                }
            }
            RuleAction::CreateTask {
                title_template,
                assignee_employee_id,
            } => {
                check_template(title_template, "title_template")?;
                Self::CreateTask {
                    title_template: title_template.clone(),
                    assignee_employee_id: *assignee_employee_id,
                }
            }
            RuleAction::CreateNote { text_template } => {
                check_template(text_template, "text_template")?;
                Self::CreateNote {
                    text_template: text_template.clone(),
                }
            }
            RuleAction::Notify { message_template } => {
                check_template(message_template, "message_template")?;
                Self::Notify {
                    message_template: message_template.clone(),
                }
            }
        })
    }

    fn action_type(&self) -> &'static str {
        match self {
            Self::CreateOperation { .. } => "create_operation",
            Self::CreateTask { .. } => "create_task",
            Self::CreateNote { .. } => "create_note",
            Self::Notify { .. } => "notify",
        }
    }
}

/// A rule ready for evaluation
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: Option<i64>,
    pub name: String,
    pub priority: i64,
    conditions: Vec<CompiledCondition>,
    actions: Vec<CompiledAction>,
}

impl CompiledRule {
    pub fn compile(def: &RuleDefinition) -> Result<Self> {
        if def.name.trim().is_empty() {
            return Err(Error::InvalidRule("rule name must not be empty".to_string()));
        }
        if def.conditions.is_empty() {
            return Err(Error::InvalidRule(format!(
                "rule '{}' needs at least one condition",
                def.name
            )));
        }
        if def.actions.is_empty() {
            return Err(Error::InvalidRule(format!(
                "rule '{}' needs at least one action",
                def.name
            )));
        }

        Ok(Self {
            id: None,
            name: def.name.clone(),
            priority: def.priority,
            conditions: def
                .conditions
                .iter()
                .map(CompiledCondition::compile)
                .collect::<Result<_>>()?,
            actions: def
                .actions
                .iter()
                .map(CompiledAction::compile)
                .collect::<Result<_>>()?,
        })
    }

    pub fn from_rule(rule: &AutomationRule) -> Result<Self> {
        let mut compiled = Self::compile(&RuleDefinition {
            name: rule.name.clone(),
            conditions: rule.conditions.clone(),
            actions: rule.actions.clone(),
            priority: rule.priority,
            is_enabled: rule.is_enabled,
        })?;
        compiled.id = Some(rule.id);
        Ok(compiled)
    }

    /// All conditions hold
    pub fn matches(&self, view: &MessageView) -> bool {
        self.conditions.iter().all(|c| c.matches(view))
    }
}

/// Check a rule definition without storing it
pub fn validate(def: &RuleDefinition) -> Result<()> {
    CompiledRule::compile(def).map(|_| ())
}

/// Validate and store a rule under a module's config
pub fn create_rule(db: &Database, module: &str, def: &RuleDefinition) -> Result<AutomationRule> {
    validate(def)?;
    let config = db
        .get_automation_config(module)?
        .ok_or_else(|| Error::NotFound(format!("automation config '{}'", module)))?;
    let id = db.insert_automation_rule(config.id, def)?;
    db.get_automation_rule(id)?
        .ok_or_else(|| Error::NotFound(format!("automation rule {}", id)))
}

// ============================================================================
// Execution
// ============================================================================

/// A side effect with every template already rendered
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlannedAction {
    CreateOperation { reference: String, title: String },
    CreateTask { title: String, assignee_employee_id: Option<i64> },
    CreateNote { text: String },
    Notify { message: String },
}

impl PlannedAction {
    pub fn action_type(&self) -> &'static str {
        match self {
            Self::CreateOperation { .. } => "create_operation",
            Self::CreateTask { .. } => "create_task",
            Self::CreateNote { .. } => "create_note",
            Self::Notify { .. } => "notify",
        }
    }
}

/// Where an action came from
#[derive(Debug, Clone, Copy)]
pub struct ActionSource {
    pub rule_id: Option<i64>,
    pub message_id: Option<i64>,
}

/// What an executed action did
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub outcome: LogOutcome,
    pub details: serde_json::Value,
}

/// Side-effect seam for rule actions
pub trait ActionExecutor: Send + Sync {
    fn execute(&self, action: &PlannedAction, source: ActionSource) -> Result<ActionResult>;

    /// Append an outcome to the automation log
    fn record(&self, log: &NewAutomationLog) -> Result<()>;
}

/// Executor writing operations, tasks, notes, and notifications to the database
#[derive(Clone)]
pub struct DatabaseActionExecutor {
    db: Database,
}

impl DatabaseActionExecutor {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl ActionExecutor for DatabaseActionExecutor {
    fn execute(&self, action: &PlannedAction, source: ActionSource) -> Result<ActionResult> {
        match action {
            PlannedAction::CreateOperation { reference, title } => {
                let (id, created) = self
                    .db
                    .create_operation(reference, title, source.message_id)?;
                Ok(if created {
                    ActionResult {
                        outcome: LogOutcome::Success,
                        details: json!({ "operation_id": id, "reference": reference }),
                    }
                } else {
                    ActionResult {
                        outcome: LogOutcome::Skipped,
                        details: json!({
                            "reason": "operation already exists",
                            "operation_id": id,
                            "reference": reference,
                        }),
                    }
                })
            }
            PlannedAction::CreateTask {
                title,
                assignee_employee_id,
            } => {
                let id = self.db.create_task(
                    title,
                    *assignee_employee_id,
                    source.message_id,
                    source.rule_id,
                )?;
                Ok(ActionResult {
                    outcome: LogOutcome::Success,
                    details: json!({ "task_id": id, "title": title }),
                })
            }
            PlannedAction::CreateNote { text } => {
                let id = self.db.create_note(text, source.message_id, source.rule_id)?;
                Ok(ActionResult {
                    outcome: LogOutcome::Success,
                    details: json!({ "note_id": id }),
                })
            }
            PlannedAction::Notify { message } => {
                let id = self
                    .db
                    .create_notification(message, source.message_id, source.rule_id)?;
                Ok(ActionResult {
                    outcome: LogOutcome::Success,
                    details: json!({ "notification_id": id }),
                })
            }
        }
    }

    fn record(&self, log: &NewAutomationLog) -> Result<()> {
        self.db.append_automation_log(log).map(|_| ())
    }
}

/// Outcome of one action for one message
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub rule_id: Option<i64>,
    pub rule_name: String,
    pub action_type: String,
    pub outcome: LogOutcome,
    pub error_message: Option<String>,
    pub details: serde_json::Value,
}

struct TemplateVars<'a> {
    subject: &'a str,
    sender: &'a str,
    reference: Option<String>,
}

fn render(template: &str, vars: &TemplateVars<'_>) -> String {
    re_placeholder()
        .replace_all(template, |caps: &regex::Captures| match &caps[1] {
            "subject" => vars.subject.to_string(),
            "sender" => vars.sender.to_string(),
            "reference" => vars.reference.clone().unwrap_or_default(),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

/// Evaluates rules against messages and fires their actions
///
/// Compiled rules are cached by rule id. Stored rules never change apart
/// from their enabled flag, which is checked on every evaluation.
pub struct RuleEngine<E: ActionExecutor> {
    executor: E,
    compiled: Mutex<HashMap<i64, Option<Arc<CompiledRule>>>>,
}

impl<E: ActionExecutor> RuleEngine<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            compiled: Mutex::new(HashMap::new()),
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Number of rules compiled so far
    pub fn compiled_count(&self) -> usize {
        self.compiled.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn compile_cached(&self, rule: &AutomationRule) -> Option<Arc<CompiledRule>> {
        let compile = || match CompiledRule::from_rule(rule) {
            Ok(compiled) => Some(Arc::new(compiled)),
            Err(e) => {
                warn!(rule_id = rule.id, error = %e, "Stored rule no longer compiles, skipping");
                None
            }
        };
        match self.compiled.lock() {
            Ok(mut cache) => cache.entry(rule.id).or_insert_with(compile).clone(),
            Err(_) => compile(),
        }
    }

    /// Enabled rules in evaluation order: priority descending, then creation order
    fn ordered(&self, rules: &[AutomationRule]) -> Vec<Arc<CompiledRule>> {
        let mut enabled: Vec<&AutomationRule> = rules.iter().filter(|r| r.is_enabled).collect();
        enabled.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        enabled
            .into_iter()
            .filter_map(|rule| self.compile_cached(rule))
            .collect()
    }

    /// Names of the rules that would fire, without executing anything
    pub fn dry_run(&self, view: &MessageView, rules: &[AutomationRule]) -> Vec<(i64, String)> {
        self.ordered(rules)
            .into_iter()
            .filter(|r| r.matches(view))
            .map(|r| (r.id.unwrap_or_default(), r.name.clone()))
            .collect()
    }

    /// Fire every matching enabled rule, logging each action's outcome
    pub fn evaluate(
        &self,
        config: &AutomationConfig,
        view: &MessageView,
        rules: &[AutomationRule],
    ) -> Vec<ActionOutcome> {
        let mut outcomes = Vec::new();

        for rule in self.ordered(rules) {
            if !rule.matches(view) {
                continue;
            }
            debug!(rule = %rule.name, message_id = ?view.message_id, "Rule matched");

            let source = ActionSource {
                rule_id: rule.id,
                message_id: view.message_id,
            };
            let mut vars = TemplateVars {
                subject: &view.subject,
                sender: &view.sender,
                reference: None,
            };

            for action in &rule.actions {
                let outcome = self.run_action(config, view, action, source, &mut vars, &rule.name);
                self.log(&outcome, source);
                outcomes.push(outcome);
            }
        }

        outcomes
    }

    fn run_action(
        &self,
        config: &AutomationConfig,
        view: &MessageView,
        action: &CompiledAction,
        source: ActionSource,
        vars: &mut TemplateVars<'_>,
        rule_name: &str,
    ) -> ActionOutcome {
        let outcome = |outcome, error_message, details| ActionOutcome {
            rule_id: source.rule_id,
            rule_name: rule_name.to_string(),
            action_type: action.action_type().to_string(),
            outcome,
            error_message,
            details,
        };

        let planned = match action {
            CompiledAction::CreateOperation {
                pattern,
                title_template,
            } => {
                let found = [&view.subject, &view.snippet, &view.body]
                    .iter()
                    .find_map(|text| pattern.find(text))
                    .map(|m| m.as_str().to_uppercase());
                let Some(reference) = found else {
                    return outcome(
                        LogOutcome::Skipped,
                        None,
                        json!({ "reason": "reference pattern did not match" }),
                    );
                };
                vars.reference = Some(reference.clone());
                let title = match title_template {
                    Some(t) => render(t, vars),
                    None => view.subject.clone(),
                };
                PlannedAction::CreateOperation { reference, title }
            }
            CompiledAction::CreateTask {
                title_template,
                assignee_employee_id,
            } => {
                if !config.auto_create_tasks {
                    return outcome(
                        LogOutcome::Skipped,
                        None,
                        json!({ "reason": "task creation disabled for module" }),
                    );
                }
                PlannedAction::CreateTask {
                    title: render(title_template, vars),
                    assignee_employee_id: *assignee_employee_id,
                }
            }
            CompiledAction::CreateNote { text_template } => {
                if !config.auto_create_notes {
                    return outcome(
                        LogOutcome::Skipped,
                        None,
                        json!({ "reason": "note creation disabled for module" }),
                    );
                }
                PlannedAction::CreateNote {
                    text: render(text_template, vars),
                }
            }
            CompiledAction::Notify { message_template } => PlannedAction::Notify {
                message: render(message_template, vars),
            },
        };

        match self.executor.execute(&planned, source) {
            Ok(result) => outcome(result.outcome, None, result.details),
            Err(e) => {
                warn!(
                    rule = rule_name,
                    action = planned.action_type(),
                    error = %e,
                    "Automation action failed"
                );
                outcome(
                    LogOutcome::Error,
                    Some(e.to_string()),
                    serde_json::to_value(&planned).unwrap_or_default(),
                )
            }
        }
    }

    fn log(&self, outcome: &ActionOutcome, source: ActionSource) {
        let entry = NewAutomationLog {
            rule_id: source.rule_id,
            message_id: source.message_id,
            action_type: outcome.action_type.clone(),
            outcome: outcome.outcome,
            error_message: outcome.error_message.clone(),
            details: outcome.details.clone(),
        };
        if let Err(e) = self.executor.record(&entry) {
            warn!(error = %e, "Failed to append automation log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AutomationConfigUpdate;

    fn cond(field: ConditionField, operator: ConditionOperator, value: &str) -> Condition {
        Condition {
            field,
            operator,
            value: value.to_string(),
        }
    }

    fn rule_def(name: &str, priority: i64, conditions: Vec<Condition>, actions: Vec<RuleAction>) -> RuleDefinition {
        RuleDefinition {
            name: name.to_string(),
            conditions,
            actions,
            priority,
            is_enabled: true,
        }
    }

    fn setup(update: AutomationConfigUpdate) -> (Database, AutomationConfig) {
        let db = Database::in_memory().unwrap();
        db.upsert_automation_config("operations", &update).unwrap();
        let config = db.get_automation_config("operations").unwrap().unwrap();
        (db, config)
    }

    /// Executor that fails one action type and records everything
    struct FlakyExecutor {
        fail_type: &'static str,
        executed: Mutex<Vec<String>>,
        logged: Mutex<Vec<NewAutomationLog>>,
    }

    impl ActionExecutor for FlakyExecutor {
        fn execute(&self, action: &PlannedAction, _source: ActionSource) -> Result<ActionResult> {
            self.executed.lock().unwrap().push(action.action_type().to_string());
            if action.action_type() == self.fail_type {
                return Err(Error::InvalidData("boom".to_string()));
            }
            Ok(ActionResult {
                outcome: LogOutcome::Success,
                details: serde_json::Value::Null,
            })
        }

        fn record(&self, log: &NewAutomationLog) -> Result<()> {
            self.logged.lock().unwrap().push(log.clone());
            Ok(())
        }
    }

    fn stored_rule(id: i64, def: RuleDefinition) -> AutomationRule {
        AutomationRule {
            id,
            config_id: 1,
            name: def.name,
            conditions: def.conditions,
            actions: def.actions,
            priority: def.priority,
            is_enabled: def.is_enabled,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_validation_rejects_bad_definitions() {
        let notify = RuleAction::Notify {
            message_template: "hi".to_string(),
        };

        let bool_mismatch = rule_def(
            "x",
            0,
            vec![cond(ConditionField::HasAttachments, ConditionOperator::Contains, "pdf")],
            vec![notify.clone()],
        );
        assert!(matches!(validate(&bool_mismatch), Err(Error::InvalidRule(_))));

        let text_with_flag = rule_def(
            "x",
            0,
            vec![cond(ConditionField::Subject, ConditionOperator::IsTrue, "")],
            vec![notify.clone()],
        );
        assert!(validate(&text_with_flag).is_err());

        let bad_regex = rule_def(
            "x",
            0,
            vec![cond(ConditionField::Subject, ConditionOperator::MatchesRegex, "NAVI-(")],
            vec![notify.clone()],
        );
        assert!(validate(&bad_regex).is_err());

        let no_actions = rule_def(
            "x",
            0,
            vec![cond(ConditionField::Subject, ConditionOperator::Contains, "a")],
            vec![],
        );
        assert!(validate(&no_actions).is_err());

        let bad_placeholder = rule_def(
            "x",
            0,
            vec![cond(ConditionField::Subject, ConditionOperator::Contains, "a")],
            vec![RuleAction::Notify {
                message_template: "New mail from {customer}".to_string(),
            }],
        );
        assert!(validate(&bad_placeholder).is_err());

        let empty_value = rule_def(
            "x",
            0,
            vec![cond(ConditionField::Sender, ConditionOperator::Equals, "  ")],
            vec![notify],
        );
        assert!(validate(&empty_value).is_err());
    }

    #[test]
    fn test_unknown_json_shapes_rejected_at_parse() {
        let unknown_action = r#"{"name":"x","conditions":[],"actions":[{"type":"delete_everything"}]}"#;
        assert!(serde_json::from_str::<RuleDefinition>(unknown_action).is_err());
        let unknown_field = r#"{"name":"x","conditions":[{"field":"cc","operator":"contains","value":"a"}],"actions":[]}"#;
        assert!(serde_json::from_str::<RuleDefinition>(unknown_field).is_err());
    }

    #[test]
    fn test_create_rule_requires_config_and_valid_definition() {
        let (db, _config) = setup(AutomationConfigUpdate::default());
        let def = rule_def(
            "navi",
            5,
            vec![cond(ConditionField::Subject, ConditionOperator::Contains, "NAVI-")],
            vec![RuleAction::CreateOperation {
                reference_pattern: r"NAVI-\d+".to_string(),
                title_template: None,
            }],
        );

        let rule = create_rule(&db, "operations", &def).unwrap();
        assert_eq!(rule.priority, 5);
        assert!(matches!(
            create_rule(&db, "billing", &def),
            Err(Error::NotFound(_))
        ));

        let mut invalid = def.clone();
        invalid.conditions[0].operator = ConditionOperator::IsFalse;
        assert!(create_rule(&db, "operations", &invalid).is_err());
        assert_eq!(db.list_rules_for_config(rule.config_id).unwrap().len(), 1);
    }

    #[test]
    fn test_condition_operators() {
        let view = MessageView {
            message_id: None,
            sender: "Ops Desk <ops@Carrier.example>".to_string(),
            subject: "Booking NAVI-1042 confirmed".to_string(),
            snippet: String::new(),
            body: "Container MSCU1234567".to_string(),
            attachment_names: vec!["BL-1042.pdf".to_string()],
            has_attachments: true,
        };
        let check = |field, op, value: &str| {
            CompiledCondition::compile(&cond(field, op, value))
                .unwrap()
                .matches(&view)
        };

        assert!(check(ConditionField::Subject, ConditionOperator::Contains, "navi-"));
        assert!(check(ConditionField::Subject, ConditionOperator::StartsWith, "BOOKING"));
        assert!(check(ConditionField::Subject, ConditionOperator::EndsWith, "Confirmed"));
        assert!(check(ConditionField::SenderDomain, ConditionOperator::Equals, "carrier.example"));
        assert!(check(ConditionField::Body, ConditionOperator::MatchesRegex, r"[A-Z]{4}\d{7}"));
        assert!(!check(ConditionField::Body, ConditionOperator::MatchesRegex, r"mscu\d{7}"));
        assert!(check(ConditionField::AttachmentName, ConditionOperator::EndsWith, ".PDF"));
        assert!(check(ConditionField::AttachmentName, ConditionOperator::NotContains, "invoice"));
        assert!(check(ConditionField::HasAttachments, ConditionOperator::IsTrue, ""));
        assert!(!check(ConditionField::HasAttachments, ConditionOperator::IsFalse, ""));
        assert!(!check(ConditionField::Sender, ConditionOperator::NotContains, "ops@"));
    }

    #[test]
    fn test_has_attachments_uses_provider_flag() {
        let message = Message {
            id: 7,
            account_id: 1,
            provider_message_id: "m7".to_string(),
            thread_id: None,
            sender: "ops@carrier.example".to_string(),
            subject: "BL copy".to_string(),
            snippet: String::new(),
            received_at: chrono::Utc::now(),
            is_read: false,
            has_attachments: true,
            body_content_hash: None,
            is_spam_filtered: false,
            spam_reason: None,
            created_at: chrono::Utc::now(),
        };
        // The attachment fetch failed, so nothing was stored
        let view = MessageView::from_message(&message, None, &[]);
        let flag = |op| {
            CompiledCondition::compile(&cond(ConditionField::HasAttachments, op, ""))
                .unwrap()
                .matches(&view)
        };

        assert!(flag(ConditionOperator::IsTrue));
        assert!(!flag(ConditionOperator::IsFalse));
        assert!(view.attachment_names.is_empty());

        let plain = MessageView::from_message(
            &Message {
                has_attachments: false,
                ..message
            },
            None,
            &[],
        );
        assert!(!plain.has_attachments);
    }

    #[test]
    fn test_all_matching_rules_fire_in_priority_order() {
        let (db, config) = setup(AutomationConfigUpdate {
            auto_create_tasks: true,
            ..Default::default()
        });
        let engine = RuleEngine::new(DatabaseActionExecutor::new(db.clone()));

        let rules = vec![
            stored_rule(
                1,
                rule_def(
                    "urgent",
                    1,
                    vec![cond(ConditionField::Subject, ConditionOperator::Contains, "urgent")],
                    vec![RuleAction::Notify {
                        message_template: "Urgent: {subject} ({reference})".to_string(),
                    }],
                ),
            ),
            stored_rule(
                2,
                rule_def(
                    "navi",
                    10,
                    vec![cond(ConditionField::Subject, ConditionOperator::Contains, "NAVI-")],
                    vec![
                        RuleAction::CreateOperation {
                            reference_pattern: r"navi-\d+".to_string(),
                            title_template: Some("Shipment {reference} from {sender}".to_string()),
                        },
                        RuleAction::CreateTask {
                            title_template: "Review {reference}".to_string(),
                            assignee_employee_id: Some(7),
                        },
                    ],
                ),
            ),
            stored_rule(
                3,
                rule_def(
                    "disabled",
                    100,
                    vec![cond(ConditionField::Subject, ConditionOperator::Contains, "urgent")],
                    vec![RuleAction::Notify {
                        message_template: "never".to_string(),
                    }],
                ),
            )
            .tap_disable(),
        ];

        let view = MessageView::adhoc("ops@carrier.example", "URGENT: booking navi-77 delayed");
        let outcomes = engine.evaluate(&config, &view, &rules);

        let order: Vec<(&str, &str)> = outcomes
            .iter()
            .map(|o| (o.rule_name.as_str(), o.action_type.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("navi", "create_operation"),
                ("navi", "create_task"),
                ("urgent", "notify"),
            ]
        );
        assert!(outcomes.iter().all(|o| o.outcome == LogOutcome::Success));

        let op = db.get_operation_by_reference("NAVI-77").unwrap().unwrap();
        assert_eq!(op.title, "Shipment NAVI-77 from ops@carrier.example");
        assert_eq!(db.list_automation_logs(None, None, 10).unwrap().len(), 3);

        // Second delivery of the same reference is skipped with the existing id
        let again = engine.evaluate(&config, &view, &rules[1..2]);
        assert_eq!(again[0].outcome, LogOutcome::Skipped);
        assert_eq!(again[0].details["operation_id"], op.id);
    }

    #[test]
    fn test_failing_action_does_not_stop_others() {
        let (_db, config) = setup(AutomationConfigUpdate {
            auto_create_tasks: true,
            auto_create_notes: true,
            ..Default::default()
        });
        let engine = RuleEngine::new(FlakyExecutor {
            fail_type: "create_task",
            executed: Mutex::new(Vec::new()),
            logged: Mutex::new(Vec::new()),
        });

        let rules = vec![
            stored_rule(
                1,
                rule_def(
                    "first",
                    5,
                    vec![cond(ConditionField::Sender, ConditionOperator::Contains, "carrier")],
                    vec![
                        RuleAction::CreateTask {
                            title_template: "t".to_string(),
                            assignee_employee_id: None,
                        },
                        RuleAction::CreateNote {
                            text_template: "n".to_string(),
                        },
                    ],
                ),
            ),
            stored_rule(
                2,
                rule_def(
                    "second",
                    1,
                    vec![cond(ConditionField::Sender, ConditionOperator::Contains, "carrier")],
                    vec![RuleAction::Notify {
                        message_template: "m".to_string(),
                    }],
                ),
            ),
        ];

        let outcomes = engine.evaluate(&config, &MessageView::adhoc("x@carrier.example", "hi"), &rules);
        let results: Vec<LogOutcome> = outcomes.iter().map(|o| o.outcome).collect();
        assert_eq!(
            results,
            vec![LogOutcome::Error, LogOutcome::Success, LogOutcome::Success]
        );
        assert_eq!(outcomes[0].error_message.as_deref(), Some("Invalid data: boom"));
        assert_eq!(engine.executor().executed.lock().unwrap().len(), 3);
        assert_eq!(engine.executor().logged.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_skips_for_unmatched_pattern_and_disabled_toggles() {
        let (db, config) = setup(AutomationConfigUpdate::default());
        let engine = RuleEngine::new(DatabaseActionExecutor::new(db.clone()));
        let rules = vec![stored_rule(
            1,
            rule_def(
                "all",
                0,
                vec![cond(ConditionField::Subject, ConditionOperator::Contains, "booking")],
                vec![
                    RuleAction::CreateOperation {
                        reference_pattern: r"NAVI-\d+".to_string(),
                        title_template: None,
                    },
                    RuleAction::CreateTask {
                        title_template: "t".to_string(),
                        assignee_employee_id: None,
                    },
                    RuleAction::CreateNote {
                        text_template: "n".to_string(),
                    },
                ],
            ),
        )];

        let outcomes = engine.evaluate(&config, &MessageView::adhoc("a@b.example", "Booking request"), &rules);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.outcome == LogOutcome::Skipped));
        assert!(db.list_operations().unwrap().is_empty());
    }

    #[test]
    fn test_dry_run_executes_nothing() {
        let (db, _config) = setup(AutomationConfigUpdate::default());
        let engine = RuleEngine::new(DatabaseActionExecutor::new(db.clone()));
        let rules = vec![stored_rule(
            4,
            rule_def(
                "navi",
                0,
                vec![cond(ConditionField::Subject, ConditionOperator::Contains, "NAVI-")],
                vec![RuleAction::CreateOperation {
                    reference_pattern: r"NAVI-\d+".to_string(),
                    title_template: None,
                }],
            ),
        )];

        let matched = engine.dry_run(&MessageView::adhoc("a@b.example", "NAVI-9"), &rules);
        assert_eq!(matched, vec![(4, "navi".to_string())]);
        assert!(db.list_operations().unwrap().is_empty());
        assert!(db.list_automation_logs(None, None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_equal_priority_rules_fire_in_creation_order() {
        let (_db, config) = setup(AutomationConfigUpdate::default());
        let engine = RuleEngine::new(FlakyExecutor {
            fail_type: "none",
            executed: Mutex::new(Vec::new()),
            logged: Mutex::new(Vec::new()),
        });
        let notify = |name: &str| {
            rule_def(
                name,
                5,
                vec![cond(ConditionField::Subject, ConditionOperator::Contains, "booking")],
                vec![RuleAction::Notify {
                    message_template: "{subject}".to_string(),
                }],
            )
        };
        // Listed newest first on purpose
        let rules = vec![
            stored_rule(9, notify("newer")),
            stored_rule(3, notify("older")),
            stored_rule(6, notify("middle")),
        ];

        let view = MessageView::adhoc("a@b.example", "Booking request");
        let fired: Vec<Option<i64>> = engine
            .evaluate(&config, &view, &rules)
            .iter()
            .map(|o| o.rule_id)
            .collect();
        assert_eq!(fired, vec![Some(3), Some(6), Some(9)]);

        let dry: Vec<i64> = engine.dry_run(&view, &rules).into_iter().map(|(id, _)| id).collect();
        assert_eq!(dry, vec![3, 6, 9]);
    }

    #[test]
    fn test_rules_compiled_once_across_messages() {
        let (_db, config) = setup(AutomationConfigUpdate::default());
        let engine = RuleEngine::new(FlakyExecutor {
            fail_type: "none",
            executed: Mutex::new(Vec::new()),
            logged: Mutex::new(Vec::new()),
        });
        let mut rules = vec![
            stored_rule(
                1,
                rule_def(
                    "container",
                    0,
                    vec![cond(ConditionField::Body, ConditionOperator::MatchesRegex, r"[A-Z]{4}\d{7}")],
                    vec![RuleAction::Notify {
                        message_template: "{subject}".to_string(),
                    }],
                ),
            ),
            stored_rule(
                2,
                rule_def(
                    "off",
                    0,
                    vec![cond(ConditionField::Subject, ConditionOperator::Contains, "x")],
                    vec![RuleAction::Notify {
                        message_template: "x".to_string(),
                    }],
                ),
            )
            .tap_disable(),
        ];

        for i in 0..5 {
            let mut view = MessageView::adhoc("a@b.example", &format!("Load {}", i));
            view.body = "Container MSCU1234567".to_string();
            assert_eq!(engine.evaluate(&config, &view, &rules).len(), 1);
        }
        // Disabled rules are never compiled
        assert_eq!(engine.compiled_count(), 1);

        // Toggling still takes effect with a warm cache
        rules[0].is_enabled = false;
        let mut view = MessageView::adhoc("a@b.example", "Load 6");
        view.body = "Container MSCU1234567".to_string();
        assert!(engine.evaluate(&config, &view, &rules).is_empty());
    }

    trait Disable {
        fn tap_disable(self) -> Self;
    }

    impl Disable for AutomationRule {
        fn tap_disable(mut self) -> Self {
            self.is_enabled = false;
            self
        }
    }
}
