//! Mail provider abstraction
//!
//! The sync loop only needs two things from a mailbox: a page of messages
//! after a continuation token, and the bytes of one attachment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::MailAccount;

mod gmail;
mod mock;

pub use gmail::{GmailProvider, OAuthClient};
pub use mock::MockProvider;

/// Attachment metadata as listed by the provider; bytes are fetched separately
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderAttachmentRef {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
}

/// One message as returned by the provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderMessage {
    pub id: String,
    pub thread_id: Option<String>,
    pub sender: String,
    pub subject: String,
    pub snippet: String,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    /// Plain-text (or HTML) body, if the message has one
    pub body: Option<String>,
    pub attachments: Vec<ProviderAttachmentRef>,
}

impl ProviderMessage {
    pub fn new(id: &str, sender: &str, subject: &str, received_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            thread_id: None,
            sender: sender.to_string(),
            subject: subject.to_string(),
            snippet: String::new(),
            received_at,
            is_read: false,
            body: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.snippet = body.chars().take(120).collect();
        self.body = Some(body.to_string());
        self
    }
}

/// A page of messages plus the token for the next one
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub messages: Vec<ProviderMessage>,
    /// `None` when the provider has no further pages
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait MailProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch one page of messages received at or after `since`
    async fn list_page(
        &self,
        account: &MailAccount,
        since: DateTime<Utc>,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<MessagePage>;

    async fn get_attachment(
        &self,
        account: &MailAccount,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>>;
}
