//! Mailroom Core Library
//!
//! Email ingestion, deduplication, and automation pipeline for the
//! logistics ERP:
//! - Database access and migrations (SQLCipher)
//! - Content-addressed blob store with pluggable backends
//! - Spam classifier driven by a TOML policy
//! - Resumable per-account mailbox sync
//! - Automation rules with typed conditions and actions
//! - AI-assisted financial suggestion detection behind a circuit breaker

pub mod ai;
pub mod automation;
pub mod circuit_breaker;
pub mod db;
pub mod document;
pub mod error;
pub mod financial;
pub mod models;
pub mod pipeline;
pub mod provider;
pub mod spam;
pub mod store;
pub mod sync;

/// Test utilities including mock Ollama server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use ai::{AIBackend, AIClient, DocumentAnalysis, DocumentKind, MockBackend, OllamaBackend};
pub use automation::{
    create_rule, validate, ActionExecutor, ActionOutcome, CompiledRule, DatabaseActionExecutor,
    MessageView, RuleEngine,
};
pub use circuit_breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use db::{AuditEntry, Database, MessageInsertResult, NewAttachment, SuggestionFilter};
pub use error::{Error, Result};
pub use financial::{extract_heuristic, Extraction, FinancialDetector};
pub use pipeline::{MessagePipeline, PipelineReport};
pub use provider::{GmailProvider, MailProvider, MockProvider, OAuthClient, ProviderMessage};
pub use spam::{SpamClassifier, SpamPolicy, SpamVerdict};
pub use store::{BlobBackend, ContentStore, LocalBackend, MemoryBackend, PutResult, S3Backend};
pub use sync::{RetryPolicy, SyncOrchestrator, SyncOutcome, SyncResult};
