//! In-memory mail provider for tests and demos

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{MailProvider, MessagePage, ProviderAttachmentRef, ProviderMessage};
use crate::error::{Error, Result};
use crate::models::MailAccount;

#[derive(Debug, Clone, Copy)]
struct InjectedFailure {
    remaining: usize,
    transient: bool,
}

/// Mailbox served from memory
///
/// Page tokens are message offsets, so any requested page size works. Failures
/// can be injected per page to exercise retries and cursor resume.
#[derive(Default)]
pub struct MockProvider {
    messages: Vec<ProviderMessage>,
    attachments: HashMap<(String, String), Vec<u8>>,
    failures: Mutex<HashMap<Option<String>, InjectedFailure>>,
    requested: Mutex<Vec<Option<String>>>,
    attachment_fetches: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: ProviderMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_messages(mut self, messages: impl IntoIterator<Item = ProviderMessage>) -> Self {
        self.messages.extend(messages);
        self
    }

    /// Attach bytes to an already added message
    pub fn with_attachment(
        mut self,
        message_id: &str,
        attachment_id: &str,
        filename: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Self {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == message_id) {
            message.attachments.push(ProviderAttachmentRef {
                id: attachment_id.to_string(),
                filename: filename.to_string(),
                mime_type: mime_type.to_string(),
                size: bytes.len() as i64,
            });
        }
        self.attachments.insert(
            (message_id.to_string(), attachment_id.to_string()),
            bytes.to_vec(),
        );
        self
    }

    /// Fail the next `times` requests for the page at `page_token`
    pub fn fail_page(&self, page_token: Option<&str>, times: usize, transient: bool) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(
                page_token.map(str::to_string),
                InjectedFailure {
                    remaining: times,
                    transient,
                },
            );
        }
    }

    /// Every page token requested so far, in order
    pub fn requested_tokens(&self) -> Vec<Option<String>> {
        self.requested.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn attachment_fetches(&self) -> usize {
        self.attachment_fetches.load(Ordering::SeqCst)
    }

    fn take_failure(&self, page_token: Option<&str>) -> Option<Error> {
        let mut failures = self.failures.lock().ok()?;
        let key = page_token.map(str::to_string);
        let failure = failures.get_mut(&key)?;
        if failure.remaining == 0 {
            return None;
        }
        failure.remaining -= 1;
        Some(if failure.transient {
            Error::ProviderTransient(format!("injected failure on page {:?}", page_token))
        } else {
            Error::Provider(format!("injected failure on page {:?}", page_token))
        })
    }
}

#[async_trait]
impl MailProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_page(
        &self,
        _account: &MailAccount,
        since: DateTime<Utc>,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<MessagePage> {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(page_token.map(str::to_string));
        }
        if let Some(err) = self.take_failure(page_token) {
            return Err(err);
        }

        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| Error::Provider(format!("invalid page token: {}", token)))?,
            None => 0,
        };

        let eligible: Vec<&ProviderMessage> = self
            .messages
            .iter()
            .filter(|m| m.received_at >= since)
            .collect();
        let page_size = page_size.max(1);
        let end = (offset + page_size).min(eligible.len());
        let messages = eligible
            .get(offset..end)
            .map(|slice| slice.iter().map(|m| (*m).clone()).collect())
            .unwrap_or_default();

        Ok(MessagePage {
            messages,
            next_page_token: (end < eligible.len()).then(|| end.to_string()),
        })
    }

    async fn get_attachment(
        &self,
        _account: &MailAccount,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>> {
        self.attachment_fetches.fetch_add(1, Ordering::SeqCst);
        self.attachments
            .get(&(message_id.to_string(), attachment_id.to_string()))
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("attachment {} on {}", attachment_id, message_id))
            })
    }
}
