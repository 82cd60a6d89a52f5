//! Gmail API v1 provider
//!
//! Lists messages with `q=after:<epoch>`, fetches each in `format=full`, and
//! walks MIME parts for the text body and attachment ids. An expired access
//! token is refreshed once per request and the rotated pair is persisted.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use super::{MailProvider, MessagePage, ProviderAttachmentRef, ProviderMessage};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::MailAccount;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

pub const GOOGLE_CLIENT_ID_ENV: &str = "MAILROOM_GOOGLE_CLIENT_ID";
pub const GOOGLE_CLIENT_SECRET_ENV: &str = "MAILROOM_GOOGLE_CLIENT_SECRET";

/// OAuth client used for token refresh
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
}

impl OAuthClient {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            client_id: std::env::var(GOOGLE_CLIENT_ID_ENV).ok()?,
            client_secret: std::env::var(GOOGLE_CLIENT_SECRET_ENV).ok()?,
        })
    }
}

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullMessage {
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Option<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartBody {
    #[serde(default)]
    attachment_id: Option<String>,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct AttachmentResponse {
    data: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

// ============================================================================
// Provider
// ============================================================================

pub struct GmailProvider {
    client: Client,
    db: Database,
    oauth: Option<OAuthClient>,
    api_base: String,
    token_url: String,
    /// Access tokens refreshed during this process, by account id
    refreshed: Mutex<HashMap<i64, String>>,
}

impl GmailProvider {
    pub fn new(db: Database, oauth: Option<OAuthClient>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            db,
            oauth,
            api_base: GMAIL_API_BASE.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            refreshed: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_env(db: Database) -> Self {
        Self::new(db, OAuthClient::from_env())
    }

    /// Point at a different API host (tests, proxies)
    pub fn with_endpoints(mut self, api_base: &str, token_url: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.token_url = token_url.to_string();
        self
    }

    fn current_token(&self, account: &MailAccount) -> String {
        self.refreshed
            .lock()
            .ok()
            .and_then(|m| m.get(&account.id).cloned())
            .unwrap_or_else(|| account.access_token.clone())
    }

    async fn refresh_token(&self, account: &MailAccount) -> Result<String> {
        let oauth = self.oauth.as_ref().ok_or_else(|| {
            Error::Provider(format!(
                "access token for {} expired and no OAuth client is configured",
                account.email
            ))
        })?;
        let refresh_token = account.refresh_token.as_deref().ok_or_else(|| {
            Error::Provider(format!(
                "access token for {} expired and no refresh token is stored",
                account.email
            ))
        })?;

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", oauth.client_id.as_str()),
                ("client_secret", oauth.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response.status(), "token refresh"));
        }

        let token: TokenResponse = response.json().await?;
        let expires_at = token
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        self.db.update_account_tokens(
            account.id,
            &token.access_token,
            token.refresh_token.as_deref(),
            expires_at,
        )?;
        if let Ok(mut refreshed) = self.refreshed.lock() {
            refreshed.insert(account.id, token.access_token.clone());
        }

        info!(account_id = account.id, "Refreshed Gmail access token");
        Ok(token.access_token)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        account: &MailAccount,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let mut token = self.current_token(account);
        let mut refreshed = false;

        loop {
            let response = self
                .client
                .get(url)
                .bearer_auth(&token)
                .query(query)
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !refreshed {
                token = self.refresh_token(account).await?;
                refreshed = true;
                continue;
            }
            if !status.is_success() {
                return Err(status_error(status, url));
            }
            return Ok(response.json().await?);
        }
    }
}

/// Map a non-success status to a retryable or terminal error
fn status_error(status: StatusCode, what: &str) -> Error {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Error::ProviderTransient(format!("{} returned {}", what, status))
    } else if status == StatusCode::NOT_FOUND {
        Error::NotFound(what.to_string())
    } else {
        Error::Provider(format!("{} returned {}", what, status))
    }
}

fn decode_base64url(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map_err(|e| Error::InvalidData(format!("Invalid base64 from Gmail: {}", e)))
}

fn find_body(part: &Part, target_mime: &str) -> Option<String> {
    if part.mime_type == target_mime && part.filename.is_empty() {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
            if let Ok(bytes) = decode_base64url(data) {
                return Some(String::from_utf8_lossy(&bytes).into_owned());
            }
        }
    }
    part.parts.iter().find_map(|p| find_body(p, target_mime))
}

fn collect_attachments(part: &Part, out: &mut Vec<ProviderAttachmentRef>) {
    if !part.filename.is_empty() {
        if let Some(body) = &part.body {
            if let Some(id) = &body.attachment_id {
                out.push(ProviderAttachmentRef {
                    id: id.clone(),
                    filename: part.filename.clone(),
                    mime_type: part.mime_type.clone(),
                    size: body.size,
                });
            }
        }
    }
    for child in &part.parts {
        collect_attachments(child, out);
    }
}

fn convert_message(full: FullMessage) -> ProviderMessage {
    let header = |name: &str| {
        full.payload
            .as_ref()
            .and_then(|p| p.headers.iter().find(|h| h.name.eq_ignore_ascii_case(name)))
            .map(|h| h.value.clone())
            .unwrap_or_default()
    };
    let sender = header("From");
    let subject = header("Subject");

    let received_at = full
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    let mut attachments = Vec::new();
    let body = full.payload.as_ref().and_then(|p| {
        collect_attachments(p, &mut attachments);
        find_body(p, "text/plain").or_else(|| find_body(p, "text/html"))
    });

    ProviderMessage {
        is_read: !full.label_ids.iter().any(|l| l == "UNREAD"),
        id: full.id,
        thread_id: full.thread_id,
        sender,
        subject,
        snippet: full.snippet,
        received_at,
        body,
        attachments,
    }
}

#[async_trait]
impl MailProvider for GmailProvider {
    fn name(&self) -> &str {
        "gmail"
    }

    async fn list_page(
        &self,
        account: &MailAccount,
        since: DateTime<Utc>,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<MessagePage> {
        let mut query = vec![
            ("q", format!("after:{}", since.timestamp())),
            ("maxResults", page_size.to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let list: MessageListResponse = self
            .get_json(account, &format!("{}/messages", self.api_base), &query)
            .await?;
        debug!(
            account_id = account.id,
            count = list.messages.len(),
            "Listed Gmail page"
        );

        let mut messages = Vec::with_capacity(list.messages.len());
        for stub in &list.messages {
            let full: FullMessage = self
                .get_json(
                    account,
                    &format!("{}/messages/{}", self.api_base, stub.id),
                    &[("format", "full".to_string())],
                )
                .await?;
            messages.push(convert_message(full));
        }

        Ok(MessagePage {
            messages,
            next_page_token: list.next_page_token,
        })
    }

    async fn get_attachment(
        &self,
        account: &MailAccount,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>> {
        let response: AttachmentResponse = self
            .get_json(
                account,
                &format!(
                    "{}/messages/{}/attachments/{}",
                    self.api_base, message_id, attachment_id
                ),
                &[],
            )
            .await?;
        decode_base64url(&response.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMailAccount;
    use axum::{
        extract::Path,
        http::{HeaderMap, StatusCode as AxumStatus},
        response::IntoResponse,
        routing::{get, post},
        Json, Router,
    };

    fn b64(s: &str) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(s)
    }

    #[test]
    fn test_convert_full_message() {
        let json = serde_json::json!({
            "id": "m1",
            "threadId": "t1",
            "labelIds": ["INBOX", "UNREAD"],
            "snippet": "Please find attached",
            "internalDate": "1709294400000",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [
                    {"name": "From", "value": "Billing <billing@carrier.example>"},
                    {"name": "Subject", "value": "Invoice NAVI-2024-17"}
                ],
                "parts": [
                    {"mimeType": "multipart/alternative", "parts": [
                        {"mimeType": "text/html", "body": {"data": b64("<p>Hi</p>")}},
                        {"mimeType": "text/plain", "body": {"data": b64("Total: USD 500.00")}}
                    ]},
                    {"mimeType": "application/pdf", "filename": "inv.pdf",
                     "body": {"attachmentId": "att-1", "size": 2048}}
                ]
            }
        });
        let full: FullMessage = serde_json::from_value(json).unwrap();
        let message = convert_message(full);

        assert_eq!(message.sender, "Billing <billing@carrier.example>");
        assert_eq!(message.subject, "Invoice NAVI-2024-17");
        assert!(!message.is_read);
        assert_eq!(message.body.as_deref(), Some("Total: USD 500.00"));
        assert_eq!(message.received_at.timestamp(), 1_709_294_400);
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].id, "att-1");
        assert_eq!(message.attachments[0].size, 2048);
    }

    #[test]
    fn test_status_mapping() {
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "x").is_transient());
        assert!(status_error(StatusCode::BAD_GATEWAY, "x").is_transient());
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "x"),
            Error::Provider(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "x"),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn test_decode_padded_and_unpadded() {
        assert_eq!(decode_base64url("aGk=").unwrap(), b"hi");
        assert_eq!(decode_base64url("aGk").unwrap(), b"hi");
    }

    async fn list_messages(headers: HeaderMap) -> axum::response::Response {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if auth != "Bearer fresh-token" {
            return AxumStatus::UNAUTHORIZED.into_response();
        }
        Json(serde_json::json!({"messages": [{"id": "m1"}]})).into_response()
    }

    async fn get_message(Path(id): Path<String>) -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "id": id,
            "labelIds": [],
            "payload": {"mimeType": "text/plain", "headers": [
                {"name": "From", "value": "ops@port.example"},
                {"name": "Subject", "value": "Arrival notice"}
            ]}
        }))
    }

    async fn get_attachment(Path((_id, _aid)): Path<(String, String)>) -> Json<serde_json::Value> {
        Json(serde_json::json!({"data": b64("%PDF-1.4"), "size": 8}))
    }

    async fn token() -> Json<serde_json::Value> {
        Json(serde_json::json!({"access_token": "fresh-token", "expires_in": 3600}))
    }

    #[tokio::test]
    async fn test_refreshes_expired_token_and_persists_it() {
        let app = Router::new()
            .route("/messages", get(list_messages))
            .route("/messages/:id", get(get_message))
            .route("/messages/:id/attachments/:aid", get(get_attachment))
            .route("/token", post(token));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let db = Database::in_memory().unwrap();
        let id = db
            .upsert_mail_account(&NewMailAccount {
                provider: "gmail".to_string(),
                provider_account_id: "g-1".to_string(),
                email: "ops@forwarder.example".to_string(),
                access_token: "stale-token".to_string(),
                refresh_token: Some("refresh-1".to_string()),
                token_expires_at: None,
                sync_range_months: 3,
            })
            .unwrap();
        let account = db.get_mail_account(id).unwrap().unwrap();

        let base = format!("http://{}", addr);
        let provider = GmailProvider::new(
            db.clone(),
            Some(OAuthClient {
                client_id: "cid".to_string(),
                client_secret: "secret".to_string(),
            }),
        )
        .with_endpoints(&base, &format!("{}/token", base));

        let page = provider
            .list_page(&account, Utc::now(), None, 50)
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].subject, "Arrival notice");
        assert!(page.next_page_token.is_none());

        let stored = db.get_mail_account(id).unwrap().unwrap();
        assert_eq!(stored.access_token, "fresh-token");
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
        assert!(stored.token_expires_at.is_some());

        let bytes = provider.get_attachment(&account, "m1", "a1").await.unwrap();
        assert_eq!(bytes, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn test_expired_token_without_oauth_client_is_terminal() {
        let app = Router::new().route("/messages", get(list_messages));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let db = Database::in_memory().unwrap();
        let id = db
            .upsert_mail_account(&NewMailAccount {
                provider: "gmail".to_string(),
                provider_account_id: "g-2".to_string(),
                email: "ops@forwarder.example".to_string(),
                access_token: "stale-token".to_string(),
                refresh_token: None,
                token_expires_at: None,
                sync_range_months: 3,
            })
            .unwrap();
        let account = db.get_mail_account(id).unwrap().unwrap();

        let base = format!("http://{}", addr);
        let provider =
            GmailProvider::new(db, None).with_endpoints(&base, &format!("{}/token", base));
        let err = provider
            .list_page(&account, Utc::now(), None, 50)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert!(!err.is_transient());
    }
}
