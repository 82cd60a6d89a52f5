//! Per-account incremental mailbox sync
//!
//! An account syncs page by page, strictly in order. After each fully
//! consumed page the provider's next-page token is saved on the account, so a
//! failed run resumes where it stopped instead of reprocessing earlier pages.
//!
//! ```text
//! never | completed | error --trigger--> syncing --pages exhausted--> completed
//!                                        syncing --unrecoverable-----> error
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{Database, NewAttachment};
use crate::error::{Error, Result};
use crate::models::{MailAccount, NewMessage};
use crate::pipeline::MessagePipeline;
use crate::provider::{MailProvider, ProviderMessage};
use crate::spam::SpamClassifier;
use crate::store::ContentStore;

/// Largest page the orchestrator asks a provider for
pub const MAX_PAGE_SIZE: usize = 500;

/// Bounded exponential backoff for provider calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Read `MAILROOM_SYNC_MAX_ATTEMPTS`, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: std::env::var("MAILROOM_SYNC_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
            ..defaults
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
        let base = self
            .initial_backoff_ms
            .saturating_mul(exponent)
            .min(self.max_backoff_ms);
        let jitter = if base == 0 {
            0
        } else {
            (std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.subsec_nanos() as u64)
                .unwrap_or(0))
                % 150
        };
        Duration::from_millis(base.saturating_add(jitter))
    }

    /// Run `op` until it succeeds, fails non-transiently, or attempts run out
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.delay(attempt);
                    warn!(
                        what,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient provider failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Counters for one sync run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    /// `newly_synced + spam_filtered + already_seen`
    pub processed: usize,
    pub newly_synced: usize,
    pub spam_filtered: usize,
    pub already_seen: usize,
    pub pages: usize,
    pub attachments_stored: usize,
    pub attachments_deduplicated: usize,
    pub attachment_errors: usize,
}

/// Result of a sync trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(SyncResult),
    /// Another sync for this account is in flight; nothing was done
    AlreadyRunning,
}

pub struct SyncOrchestrator {
    db: Database,
    store: ContentStore,
    provider: Arc<dyn MailProvider>,
    classifier: Arc<SpamClassifier>,
    pipeline: Option<Arc<MessagePipeline>>,
    retry: RetryPolicy,
    page_size: usize,
}

impl SyncOrchestrator {
    pub fn new(
        db: Database,
        store: ContentStore,
        provider: Arc<dyn MailProvider>,
        classifier: Arc<SpamClassifier>,
    ) -> Self {
        Self {
            db,
            store,
            provider,
            classifier,
            pipeline: None,
            retry: RetryPolicy::from_env(),
            page_size: std::env::var("MAILROOM_SYNC_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(MAX_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Run rules and financial detection on every newly kept message
    pub fn with_pipeline(mut self, pipeline: Arc<MessagePipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Sync one account
    ///
    /// A second trigger while the account is `syncing` returns
    /// [`SyncOutcome::AlreadyRunning`] without touching anything.
    pub async fn sync(&self, account_id: i64) -> Result<SyncOutcome> {
        if self.db.get_mail_account(account_id)?.is_none() {
            return Err(Error::NotFound(format!("mail account {}", account_id)));
        }
        if !self.db.try_begin_sync(account_id)? {
            info!(account_id, "Sync already in flight, ignoring trigger");
            return Ok(SyncOutcome::AlreadyRunning);
        }

        // Re-read under the syncing status so the cursor is current
        let account = match self.db.get_mail_account(account_id) {
            Ok(Some(account)) => account,
            Ok(None) => return Err(Error::NotFound(format!("mail account {}", account_id))),
            Err(e) => {
                self.db.fail_sync(account_id, &e.to_string())?;
                return Err(e);
            }
        };

        info!(
            account_id,
            email = %account.email,
            provider = self.provider.name(),
            resume = account.sync_page_token.is_some(),
            "Sync started"
        );

        let mut result = SyncResult::default();
        match self.run(&account, &mut result).await {
            Ok(()) => {
                self.db.complete_sync(account_id, Utc::now())?;
                info!(
                    account_id,
                    processed = result.processed,
                    newly_synced = result.newly_synced,
                    spam_filtered = result.spam_filtered,
                    already_seen = result.already_seen,
                    pages = result.pages,
                    "Sync completed"
                );
                Ok(SyncOutcome::Completed(result))
            }
            Err(e) => {
                warn!(account_id, pages = result.pages, error = %e, "Sync failed");
                self.db.fail_sync(account_id, &e.to_string())?;
                Err(e)
            }
        }
    }

    async fn run(&self, account: &MailAccount, result: &mut SyncResult) -> Result<()> {
        let since = lookback_start(Utc::now(), account.sync_range_months);
        let mut page_token = account.sync_page_token.clone();
        let mut resuming = page_token.is_some();

        loop {
            let fetched = self
                .retry
                .run("list_page", || {
                    self.provider
                        .list_page(account, since, page_token.as_deref(), self.page_size)
                })
                .await;
            let page = match fetched {
                Ok(page) => page,
                // A saved cursor the provider rejects is dead; start over once
                Err(e) if resuming && !e.is_transient() => {
                    warn!(
                        account_id = account.id,
                        error = %e,
                        "Saved page token rejected, restarting from the first page"
                    );
                    self.db.save_sync_cursor(account.id, None)?;
                    page_token = None;
                    resuming = false;
                    continue;
                }
                Err(e) => return Err(e),
            };
            resuming = false;

            debug!(
                account_id = account.id,
                page = result.pages + 1,
                messages = page.messages.len(),
                "Fetched page"
            );

            for message in &page.messages {
                self.process_message(account, message, result).await?;
            }
            result.pages += 1;

            self.db
                .save_sync_cursor(account.id, page.next_page_token.as_deref())?;
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => return Ok(()),
            }
        }
    }

    async fn process_message(
        &self,
        account: &MailAccount,
        message: &ProviderMessage,
        result: &mut SyncResult,
    ) -> Result<()> {
        result.processed += 1;

        let inserted = self.db.upsert_message(&NewMessage {
            account_id: account.id,
            provider_message_id: message.id.clone(),
            thread_id: message.thread_id.clone(),
            sender: message.sender.clone(),
            subject: message.subject.clone(),
            snippet: message.snippet.clone(),
            received_at: message.received_at,
            is_read: message.is_read,
            has_attachments: !message.attachments.is_empty(),
        })?;
        if !inserted.needs_processing() {
            result.already_seen += 1;
            return Ok(());
        }
        let message_id = inserted.id();
        if !inserted.is_new() {
            debug!(message_id, "Finishing message left over from an interrupted sync");
        }

        let verdict = self.classifier.classify(&message.sender, &message.subject);
        if !verdict.keep {
            debug!(message_id, sender = %message.sender, reason = %verdict.reason, "Filtered as spam");
            self.db.mark_message_filtered(message_id, &verdict.reason)?;
            self.db.mark_message_processed(message_id)?;
            result.spam_filtered += 1;
            return Ok(());
        }
        result.newly_synced += 1;

        if let Some(body) = &message.body {
            let put = self.store.put(body.as_bytes()).await?;
            self.db.set_message_body_hash(message_id, &put.hash)?;
        }

        for attachment in &message.attachments {
            let bytes = self
                .retry
                .run("get_attachment", || {
                    self.provider
                        .get_attachment(account, &message.id, &attachment.id)
                })
                .await;
            let bytes = match bytes {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        message_id,
                        attachment = %attachment.filename,
                        error = %e,
                        "Attachment fetch failed"
                    );
                    result.attachment_errors += 1;
                    continue;
                }
            };

            let put = self.store.put(&bytes).await?;
            if put.stored {
                result.attachments_stored += 1;
            } else {
                result.attachments_deduplicated += 1;
            }
            self.db.insert_attachment(&NewAttachment {
                message_id,
                provider_attachment_id: attachment.id.clone(),
                filename: attachment.filename.clone(),
                mime_type: attachment.mime_type.clone(),
                size: bytes.len() as i64,
                content_hash: put.hash,
            })?;
        }

        if let Some(pipeline) = &self.pipeline {
            self.run_pipeline(pipeline, message_id, message.body.as_deref())
                .await;
        }
        self.db.mark_message_processed(message_id)?;
        Ok(())
    }

    async fn run_pipeline(&self, pipeline: &MessagePipeline, message_id: i64, body: Option<&str>) {
        let loaded = self.db.get_message(message_id).and_then(|m| {
            let attachments = self.db.get_attachments_for_message(message_id)?;
            Ok((m, attachments))
        });
        match loaded {
            Ok((Some(stored), attachments)) => {
                if let Err(e) = pipeline.process(&stored, body, &attachments).await {
                    warn!(message_id, error = %e, "Automation pipeline failed");
                }
            }
            Ok((None, _)) => warn!(message_id, "Stored message vanished before automation"),
            Err(e) => warn!(message_id, error = %e, "Could not load message for automation"),
        }
    }
}

/// Oldest receive time included in a sync
pub fn lookback_start(now: DateTime<Utc>, range_months: i64) -> DateTime<Utc> {
    let months = u32::try_from(range_months.max(0)).unwrap_or(u32::MAX);
    now.checked_sub_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
