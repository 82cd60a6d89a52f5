//! Domain models for Mailroom

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A linked mailbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailAccount {
    pub id: i64,
    pub provider: String,
    pub provider_account_id: String,
    pub email: String,
    /// OAuth access token (never serialized to API clients)
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub sync_enabled: bool,
    pub sync_status: SyncStatus,
    pub last_sync_date: Option<DateTime<Utc>>,
    pub sync_range_months: i64,
    /// Token of the next provider page to fetch when resuming an interrupted sync
    pub sync_page_token: Option<String>,
    pub last_sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Data needed to connect a mailbox
#[derive(Debug, Clone, Deserialize)]
pub struct NewMailAccount {
    pub provider: String,
    pub provider_account_id: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_sync_range_months")]
    pub sync_range_months: i64,
}

fn default_sync_range_months() -> i64 {
    3
}

/// Account-level sync state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Never,
    Syncing,
    Completed,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Syncing => "syncing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "syncing" => Ok(Self::Syncing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown sync status: {}", s)),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A synced message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub account_id: i64,
    pub provider_message_id: String,
    pub thread_id: Option<String>,
    pub sender: String,
    pub subject: String,
    pub snippet: String,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    pub has_attachments: bool,
    /// Weak reference into the content store
    pub body_content_hash: Option<String>,
    pub is_spam_filtered: bool,
    pub spam_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Domain part of the sender address, lowercased
    pub fn sender_domain(&self) -> String {
        sender_domain(&self.sender)
    }
}

/// Extract the lowercased domain from `Name <user@host>` or `user@host`
pub fn sender_domain(sender: &str) -> String {
    let addr = match (sender.rfind('<'), sender.rfind('>')) {
        (Some(start), Some(end)) if start < end => &sender[start + 1..end],
        _ => sender,
    };
    addr.rsplit_once('@')
        .map(|(_, domain)| domain.trim().trim_end_matches('.').to_lowercase())
        .unwrap_or_default()
}

/// Message metadata to upsert
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub account_id: i64,
    pub provider_message_id: String,
    pub thread_id: Option<String>,
    pub sender: String,
    pub subject: String,
    pub snippet: String,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    pub has_attachments: bool,
}

/// An attachment row (weak reference to a blob)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub message_id: i64,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    /// PDFs and images are the documents worth sending to financial extraction
    pub fn is_financial_document(&self) -> bool {
        let mime = self.mime_type.to_lowercase();
        mime == "application/pdf" || mime.starts_with("image/")
    }
}

/// Where a blob's bytes physically live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlobLocation {
    /// In the configured blob backend
    #[default]
    Backend,
    /// Inline in the relational store (backend was unreachable at write time)
    Inline,
}

impl BlobLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Inline => "inline",
        }
    }
}

impl std::str::FromStr for BlobLocation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "backend" => Ok(Self::Backend),
            "inline" => Ok(Self::Inline),
            _ => Err(format!("Unknown blob location: {}", s)),
        }
    }
}

/// Index row for a stored blob
#[derive(Debug, Clone, Serialize)]
pub struct BlobRecord {
    pub hash: String,
    pub size: i64,
    pub location: BlobLocation,
    pub created_at: DateTime<Utc>,
}

/// How aggressively a module leans on the AI service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AiOptimizationLevel {
    /// Never call the AI service
    HeuristicOnly,
    /// Call the AI service, fall back to heuristics when it is unavailable
    #[default]
    Balanced,
    /// Call the AI service, skip the document when it is unavailable
    AiOnly,
}

impl AiOptimizationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeuristicOnly => "heuristic_only",
            Self::Balanced => "balanced",
            Self::AiOnly => "ai_only",
        }
    }
}

impl std::str::FromStr for AiOptimizationLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "heuristic_only" | "heuristic" => Ok(Self::HeuristicOnly),
            "balanced" => Ok(Self::Balanced),
            "ai_only" | "ai" => Ok(Self::AiOnly),
            _ => Err(format!("Unknown AI optimization level: {}", s)),
        }
    }
}

impl std::fmt::Display for AiOptimizationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-module automation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    pub id: i64,
    pub module: String,
    pub is_enabled: bool,
    pub process_attachments: bool,
    pub auto_create_tasks: bool,
    pub auto_create_notes: bool,
    pub ai_optimization_level: AiOptimizationLevel,
    pub auto_detect_payments: bool,
    pub auto_detect_expenses: bool,
    /// Date proximity (in days) for duplicate suggestion detection
    pub duplicate_window_days: i64,
    pub selected_account_ids: Vec<i64>,
    pub selected_employee_ids: Vec<i64>,
    pub updated_at: DateTime<Utc>,
}

impl AutomationConfig {
    pub fn detection_enabled(&self) -> bool {
        self.is_enabled && (self.auto_detect_payments || self.auto_detect_expenses)
    }

    pub fn allows(&self, kind: SuggestionKind) -> bool {
        match kind {
            SuggestionKind::Payment => self.auto_detect_payments,
            SuggestionKind::Expense => self.auto_detect_expenses,
        }
    }

    pub fn owns_account(&self, account_id: i64) -> bool {
        self.selected_account_ids.contains(&account_id)
    }
}

/// Settings accepted when creating or replacing a module's config
#[derive(Debug, Clone, Deserialize)]
pub struct AutomationConfigUpdate {
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default = "default_true")]
    pub process_attachments: bool,
    #[serde(default)]
    pub auto_create_tasks: bool,
    #[serde(default)]
    pub auto_create_notes: bool,
    #[serde(default)]
    pub ai_optimization_level: AiOptimizationLevel,
    #[serde(default)]
    pub auto_detect_payments: bool,
    #[serde(default)]
    pub auto_detect_expenses: bool,
    #[serde(default = "default_duplicate_window_days")]
    pub duplicate_window_days: i64,
    #[serde(default)]
    pub selected_account_ids: Vec<i64>,
    #[serde(default)]
    pub selected_employee_ids: Vec<i64>,
}

impl Default for AutomationConfigUpdate {
    fn default() -> Self {
        Self {
            is_enabled: true,
            process_attachments: true,
            auto_create_tasks: false,
            auto_create_notes: false,
            ai_optimization_level: AiOptimizationLevel::default(),
            auto_detect_payments: false,
            auto_detect_expenses: false,
            duplicate_window_days: default_duplicate_window_days(),
            selected_account_ids: Vec::new(),
            selected_employee_ids: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

pub const DEFAULT_DUPLICATE_WINDOW_DAYS: i64 = 3;

fn default_duplicate_window_days() -> i64 {
    DEFAULT_DUPLICATE_WINDOW_DAYS
}

/// Message attribute a rule condition inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    Subject,
    Sender,
    SenderDomain,
    Snippet,
    Body,
    AttachmentName,
    HasAttachments,
}

impl ConditionField {
    pub fn is_boolean(&self) -> bool {
        matches!(self, Self::HasAttachments)
    }
}

/// Comparison a rule condition applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Contains,
    NotContains,
    Equals,
    StartsWith,
    EndsWith,
    MatchesRegex,
    IsTrue,
    IsFalse,
}

impl ConditionOperator {
    pub fn is_boolean(&self) -> bool {
        matches!(self, Self::IsTrue | Self::IsFalse)
    }
}

/// One rule condition (all conditions of a rule must hold)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub field: ConditionField,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: String,
}

/// Side effect fired when a rule matches
///
/// Templates accept `{subject}`, `{sender}` and `{reference}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum RuleAction {
    /// Create an operation whose reference is the first match of `reference_pattern`
    CreateOperation {
        reference_pattern: String,
        #[serde(default)]
        title_template: Option<String>,
    },
    CreateTask {
        title_template: String,
        #[serde(default)]
        assignee_employee_id: Option<i64>,
    },
    CreateNote {
        text_template: String,
    },
    Notify {
        message_template: String,
    },
}

impl RuleAction {
    pub fn action_type(&self) -> &'static str {
        match self {
            Self::CreateOperation { .. } => "create_operation",
            Self::CreateTask { .. } => "create_task",
            Self::CreateNote { .. } => "create_note",
            Self::Notify { .. } => "notify",
        }
    }
}

/// A stored automation rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: i64,
    pub config_id: i64,
    pub name: String,
    pub conditions: Vec<Condition>,
    pub actions: Vec<RuleAction>,
    pub priority: i64,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Rule definition as submitted by a user, validated before storage
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDefinition {
    pub name: String,
    pub conditions: Vec<Condition>,
    pub actions: Vec<RuleAction>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
}

/// Outcome of a single action execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutcome {
    Success,
    Error,
    Skipped,
}

impl LogOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for LogOutcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Unknown log outcome: {}", s)),
        }
    }
}

impl std::fmt::Display for LogOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only record of one action execution
#[derive(Debug, Clone, Serialize)]
pub struct AutomationLog {
    pub id: i64,
    pub rule_id: Option<i64>,
    pub message_id: Option<i64>,
    pub action_type: String,
    pub outcome: LogOutcome,
    pub error_message: Option<String>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Log entry to append
#[derive(Debug, Clone)]
pub struct NewAutomationLog {
    pub rule_id: Option<i64>,
    pub message_id: Option<i64>,
    pub action_type: String,
    pub outcome: LogOutcome,
    pub error_message: Option<String>,
    pub details: serde_json::Value,
}

/// Payment (money in) or expense (money out)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Payment,
    Expense,
}

impl SuggestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Expense => "expense",
        }
    }
}

impl std::str::FromStr for SuggestionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "payment" => Ok(Self::Payment),
            "expense" => Ok(Self::Expense),
            _ => Err(format!("Unknown suggestion type: {}", s)),
        }
    }
}

impl std::fmt::Display for SuggestionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Review state of a suggestion; `approved` and `rejected` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for SuggestionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Unknown suggestion status: {}", s)),
        }
    }
}

impl std::fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a suggestion's fields were extracted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    #[default]
    Ai,
    Heuristic,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Heuristic => "heuristic",
        }
    }
}

impl std::str::FromStr for ExtractionMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ai" => Ok(Self::Ai),
            "heuristic" => Ok(Self::Heuristic),
            _ => Err(format!("Unknown extraction method: {}", s)),
        }
    }
}

/// Candidate payment/expense awaiting human review
#[derive(Debug, Clone, Serialize)]
pub struct FinancialSuggestion {
    pub id: i64,
    pub kind: SuggestionKind,
    pub amount: f64,
    pub amount_cents: i64,
    pub currency: String,
    pub description: Option<String>,
    pub document_date: Option<NaiveDate>,
    /// 0-100
    pub ai_confidence: i64,
    pub extraction_method: ExtractionMethod,
    pub status: SuggestionStatus,
    pub is_duplicate: bool,
    pub duplicate_reason: Option<String>,
    pub related_suggestion_id: Option<i64>,
    pub operation_id: Option<i64>,
    pub source_message_id: Option<i64>,
    pub source_attachment_id: Option<i64>,
    pub rejection_reason: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Extracted candidate before duplicate checking and insertion
#[derive(Debug, Clone)]
pub struct NewFinancialSuggestion {
    pub kind: SuggestionKind,
    pub amount_cents: i64,
    pub currency: String,
    pub description: Option<String>,
    pub document_date: Option<NaiveDate>,
    pub ai_confidence: i64,
    pub extraction_method: ExtractionMethod,
    pub operation_id: Option<i64>,
    pub source_message_id: Option<i64>,
    pub source_attachment_id: Option<i64>,
}

/// Convert a decimal amount to integer cents
pub fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// An ERP operation (shipment file) that mail can be attached to
#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    pub id: i64,
    pub reference: String,
    pub title: String,
    pub source_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Downstream record created when a suggestion is approved
#[derive(Debug, Clone, Serialize)]
pub struct FinancialRecord {
    pub id: i64,
    pub suggestion_id: i64,
    pub kind: SuggestionKind,
    pub amount_cents: i64,
    pub currency: String,
    pub operation_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_domain() {
        assert_eq!(sender_domain("Billing <billing@Chase.com>"), "chase.com");
        assert_eq!(sender_domain("noreply@retailer.com"), "retailer.com");
        assert_eq!(sender_domain("not an address"), "");
    }

    #[test]
    fn test_to_cents() {
        assert_eq!(to_cents(500.0), 50000);
        assert_eq!(to_cents(19.99), 1999);
        assert_eq!(to_cents(0.1 + 0.2), 30);
    }

    #[test]
    fn test_rule_action_tagged() {
        let json = r#"{"type":"create_operation","reference_pattern":"NAVI-\\d+"}"#;
        let action: RuleAction = serde_json::from_str(json).unwrap();
        assert_eq!(action.action_type(), "create_operation");

        let bad = r#"{"type":"send_fax","number":"555"}"#;
        assert!(serde_json::from_str::<RuleAction>(bad).is_err());
    }

    #[test]
    fn test_condition_rejects_unknown_operator() {
        let json = r#"{"field":"subject","operator":"sounds_like","value":"x"}"#;
        assert!(serde_json::from_str::<Condition>(json).is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for s in ["never", "syncing", "completed", "error"] {
            let status: SyncStatus = s.parse().unwrap();
            assert_eq!(status.as_str(), s);
        }
        assert!("bogus".parse::<SuggestionStatus>().is_err());
    }
}
