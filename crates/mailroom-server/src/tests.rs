//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use mailroom_core::models::{
    AutomationConfigUpdate, ExtractionMethod, NewFinancialSuggestion, NewMailAccount, NewMessage,
    SuggestionKind,
};
use mailroom_core::provider::ProviderMessage;
use mailroom_core::store::MemoryBackend;
use tower::ServiceExt;

struct TestApp {
    state: Arc<AppState>,
}

impl TestApp {
    fn new() -> Self {
        Self::with_provider(MockProvider::new())
    }

    fn with_provider(provider: MockProvider) -> Self {
        let db = Database::in_memory().unwrap();
        let store = ContentStore::new(db.clone(), Arc::new(MemoryBackend::new()));
        let breaker = Arc::new(CircuitBreaker::with_params(
            2,
            1,
            std::time::Duration::from_secs(60),
        ));
        let classifier = Arc::new(SpamClassifier::new(SpamPolicy::embedded().unwrap()));
        let state = Arc::new(AppState::new(
            db,
            ServerConfig::default(),
            store,
            breaker,
            classifier,
            Arc::new(provider),
            None,
        ));
        Self { state }
    }

    fn db(&self) -> &Database {
        &self.state.db
    }

    fn router(&self) -> Router {
        create_router(self.state.clone(), None)
    }

    async fn send(&self, method: &str, uri: &str, body: Option<serde_json::Value>) -> Response {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(USER_HEADER, "ops@forwarder.example");
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.router().oneshot(request).await.unwrap()
    }

    fn seed_account(&self) -> i64 {
        self.db()
            .upsert_mail_account(&NewMailAccount {
                provider: "gmail".to_string(),
                provider_account_id: "acct-1".to_string(),
                email: "ops@forwarder.example".to_string(),
                access_token: "secret-access".to_string(),
                refresh_token: Some("secret-refresh".to_string()),
                token_expires_at: None,
                sync_range_months: 3,
            })
            .unwrap()
    }

    fn seed_suggestion(&self, amount_cents: i64) -> i64 {
        self.db()
            .insert_suggestion_checked(
                &NewFinancialSuggestion {
                    kind: SuggestionKind::Payment,
                    amount_cents,
                    currency: "USD".to_string(),
                    description: Some("Freight invoice".to_string()),
                    document_date: Some(Utc::now().date_naive()),
                    ai_confidence: 80,
                    extraction_method: ExtractionMethod::Ai,
                    operation_id: None,
                    source_message_id: None,
                    source_attachment_id: None,
                },
                3,
            )
            .unwrap()
            .id
    }
}

async fn get_body_json(response: Response) -> serde_json::Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ========== Account API Tests ==========

#[tokio::test]
async fn test_connect_account_hides_tokens() {
    let app = TestApp::new();

    let response = app
        .send(
            "POST",
            "/api/accounts",
            Some(serde_json::json!({
                "provider": "gmail",
                "provider_account_id": "acct-9",
                "email": "billing@forwarder.example",
                "access_token": "secret-access",
                "refresh_token": "secret-refresh"
            })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["email"], "billing@forwarder.example");
    assert_eq!(json["sync_status"], "never");
    assert_eq!(json["sync_range_months"], 3);
    assert!(json.get("access_token").is_none());
    assert!(json.get("refresh_token").is_none());
}

#[tokio::test]
async fn test_connect_account_rejects_bad_range() {
    let app = TestApp::new();

    let response = app
        .send(
            "POST",
            "/api/accounts",
            Some(serde_json::json!({
                "provider": "gmail",
                "provider_account_id": "acct-9",
                "email": "billing@forwarder.example",
                "access_token": "t",
                "sync_range_months": 0
            })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_missing_account_is_404() {
    let app = TestApp::new();
    let response = app.send("GET", "/api/accounts/999", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_toggle_sync_enabled() {
    let app = TestApp::new();
    let id = app.seed_account();

    let response = app
        .send(
            "PUT",
            &format!("/api/accounts/{}/sync-enabled", id),
            Some(serde_json::json!({ "enabled": false })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["sync_enabled"], false);
    assert!(app.db().list_sync_enabled_accounts().unwrap().is_empty());
}

#[tokio::test]
async fn test_disconnect_account() {
    let app = TestApp::new();
    let id = app.seed_account();

    let response = app
        .send("DELETE", &format!("/api/accounts/{}", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.db().get_mail_account(id).unwrap().is_none());

    let response = app
        .send("DELETE", &format!("/api/accounts/{}", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_trigger_sync_runs_in_background() {
    let now = Utc::now();
    let provider = MockProvider::new().with_messages(vec![
        ProviderMessage::new("m1", "carrier@maersk.com", "Arrival notice", now),
        ProviderMessage::new(
            "m2",
            "newsletter@shop.example",
            "What's new this week",
            now - Duration::hours(1),
        ),
    ]);
    let app = TestApp::with_provider(provider);
    let id = app.seed_account();

    let response = app
        .send("POST", &format!("/api/accounts/{}/sync", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "started");

    let mut completed = false;
    for _ in 0..100 {
        let account = app.db().get_mail_account(id).unwrap().unwrap();
        if account.sync_status == mailroom_core::models::SyncStatus::Completed {
            completed = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(completed, "sync did not complete");

    // Filtered messages are hidden unless asked for
    let response = app
        .send("GET", &format!("/api/accounts/{}/messages", id), None)
        .await;
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);

    let response = app
        .send(
            "GET",
            &format!("/api/accounts/{}/messages?include_filtered=true", id),
            None,
        )
        .await;
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_trigger_sync_while_running() {
    let app = TestApp::new();
    let id = app.seed_account();
    assert!(app.db().try_begin_sync(id).unwrap());

    let response = app
        .send("POST", &format!("/api/accounts/{}/sync", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "already_running");
}

// ========== Message API Tests ==========

#[tokio::test]
async fn test_get_message_and_mark_read() {
    let app = TestApp::new();
    let account_id = app.seed_account();
    let message_id = app
        .db()
        .upsert_message(&NewMessage {
            account_id,
            provider_message_id: "m1".to_string(),
            thread_id: None,
            sender: "carrier@maersk.com".to_string(),
            subject: "Arrival notice".to_string(),
            snippet: String::new(),
            received_at: Utc::now(),
            is_read: false,
            has_attachments: false,
        })
        .unwrap()
        .id();

    let response = app
        .send(
            "PUT",
            &format!("/api/messages/{}/read", message_id),
            Some(serde_json::json!({ "is_read": true })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send("GET", &format!("/api/messages/{}", message_id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["is_read"], true);
    assert_eq!(json["attachments"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_get_blob() {
    let app = TestApp::new();
    let put = app.state.store.put(b"%PDF-1.4 invoice").await.unwrap();

    let response = app
        .send("GET", &format!("/api/blobs/{}", put.hash), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"%PDF-1.4 invoice");

    let response = app.send("GET", "/api/blobs/not-a-hash", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let missing = "0".repeat(64);
    let response = app
        .send("GET", &format!("/api/blobs/{}", missing), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ========== Automation API Tests ==========

fn enabled_config() -> serde_json::Value {
    serde_json::json!({
        "is_enabled": true,
        "ai_optimization_level": "balanced",
        "auto_detect_payments": true,
        "duplicate_window_days": 3
    })
}

#[tokio::test]
async fn test_upsert_and_get_config() {
    let app = TestApp::new();

    let response = app
        .send("PUT", "/api/automation/configs/operations", Some(enabled_config()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["module"], "operations");
    assert_eq!(json["auto_detect_payments"], true);

    let response = app.send("GET", "/api/automation/configs/operations", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.send("GET", "/api/automation/configs/missing", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upsert_config_rejects_negative_window() {
    let app = TestApp::new();
    let response = app
        .send(
            "PUT",
            "/api/automation/configs/operations",
            Some(serde_json::json!({ "duplicate_window_days": -1 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_rule_and_toggle() {
    let app = TestApp::new();
    app.db()
        .upsert_automation_config("operations", &AutomationConfigUpdate::default())
        .unwrap();

    let response = app
        .send(
            "POST",
            "/api/automation/configs/operations/rules",
            Some(serde_json::json!({
                "name": "Booking confirmations",
                "conditions": [
                    { "field": "subject", "operator": "contains", "value": "booking" }
                ],
                "actions": [
                    { "type": "create_operation", "reference_pattern": "OP-\\d+" }
                ]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    let rule_id = json["id"].as_i64().unwrap();

    let response = app
        .send(
            "PUT",
            &format!("/api/automation/rules/{}/enabled", rule_id),
            Some(serde_json::json!({ "enabled": false })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["is_enabled"], false);

    let response = app
        .send("GET", "/api/automation/configs/operations/rules", None)
        .await;
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);

    let response = app
        .send("DELETE", &format!("/api/automation/rules/{}", rule_id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_create_rule_rejects_invalid_regex() {
    let app = TestApp::new();
    app.db()
        .upsert_automation_config("operations", &AutomationConfigUpdate::default())
        .unwrap();

    let response = app
        .send(
            "POST",
            "/api/automation/configs/operations/rules",
            Some(serde_json::json!({
                "name": "Broken",
                "conditions": [
                    { "field": "subject", "operator": "matches_regex", "value": "(unclosed" }
                ],
                "actions": [
                    { "type": "notify", "message_template": "{subject}" }
                ]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let config = app.db().get_automation_config("operations").unwrap().unwrap();
    assert!(app.db().list_rules_for_config(config.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_create_rule_for_missing_config() {
    let app = TestApp::new();
    let response = app
        .send(
            "POST",
            "/api/automation/configs/nowhere/rules",
            Some(serde_json::json!({
                "name": "Orphan",
                "conditions": [
                    { "field": "subject", "operator": "contains", "value": "x" }
                ],
                "actions": [
                    { "type": "notify", "message_template": "{subject}" }
                ]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ========== Suggestion API Tests ==========

#[tokio::test]
async fn test_approve_suggestion_twice_conflicts() {
    let app = TestApp::new();
    let id = app.seed_suggestion(50_000);

    let response = app
        .send("POST", &format!("/api/suggestions/{}/approve", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "approved");
    assert_eq!(json["reviewed_by"], "ops@forwarder.example");

    let response = app
        .send("POST", &format!("/api/suggestions/{}/approve", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .send(
            "POST",
            &format!("/api/suggestions/{}/reject", id),
            Some(serde_json::json!({ "reason": "too late" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_reject_suggestion_with_reason() {
    let app = TestApp::new();
    let id = app.seed_suggestion(12_345);

    let response = app
        .send(
            "POST",
            &format!("/api/suggestions/{}/reject", id),
            Some(serde_json::json!({ "reason": "Not ours" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "rejected");
    assert_eq!(json["rejection_reason"], "Not ours");
}

#[tokio::test]
async fn test_list_suggestions_filters_by_status() {
    let app = TestApp::new();
    let first = app.seed_suggestion(100);
    app.seed_suggestion(200);
    app.db().approve_suggestion(first, "someone").unwrap();

    let response = app.send("GET", "/api/suggestions?status=pending", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    let list = json.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["amount_cents"], 200);

    let response = app.send("GET", "/api/suggestions?status=bogus", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ========== AI / Spam / Audit Tests ==========

#[tokio::test]
async fn test_breaker_status_and_reset() {
    let app = TestApp::new();
    app.state.breaker.record_failure(&"timeout");
    app.state.breaker.record_failure(&"timeout");

    let response = app.send("GET", "/api/ai/breaker", None).await;
    let json = get_body_json(response).await;
    assert_eq!(json["state"], "open");
    assert_eq!(json["last_error"], "timeout");

    let response = app.send("POST", "/api/ai/breaker/reset", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["state"], "closed");
    assert_eq!(json["failure_count"], 0);
}

#[tokio::test]
async fn test_classify_message() {
    let app = TestApp::new();

    let response = app
        .send(
            "POST",
            "/api/spam/classify",
            Some(serde_json::json!({
                "sender": "noreply@shop.example",
                "subject": "Invoice INV-22 attached"
            })),
        )
        .await;
    let json = get_body_json(response).await;
    assert_eq!(json["keep"], true);

    let response = app
        .send(
            "POST",
            "/api/spam/classify",
            Some(serde_json::json!({
                "sender": "newsletter@shop.example",
                "subject": "What's new this week"
            })),
        )
        .await;
    let json = get_body_json(response).await;
    assert_eq!(json["keep"], false);
}

#[tokio::test]
async fn test_actions_are_audited() {
    let app = TestApp::new();
    let id = app.seed_account();

    app.send("GET", &format!("/api/accounts/{}", id), None).await;

    let response = app.send("GET", "/api/audit?limit=10", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    let entries = json.as_array().unwrap();
    assert!(entries.iter().any(|e| e["action"] == "get"
        && e["entity_type"] == "mail_account"
        && e["user_email"] == "ops@forwarder.example"));
}

#[tokio::test]
async fn test_security_headers() {
    let app = TestApp::new();
    let response = app.send("GET", "/api/accounts", None).await;
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
}

#[test]
fn test_user_email_defaults_to_local_dev() {
    let headers = axum::http::HeaderMap::new();
    assert_eq!(get_user_email(&headers), "local-dev");
}
