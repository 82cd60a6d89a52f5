//! Mailroom Web Server
//!
//! Axum-based REST API consumed by the rest of the ERP: mailbox accounts and
//! sync triggers, automation configs and rules, financial suggestion review,
//! breaker status, and the audit trail.
//!
//! Authentication is handled upstream. The actor recorded in the audit log is
//! taken from the identity header the gateway sets.

use std::path::Path;
use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::{
    cors::CorsLayer, services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use tracing::{error, info, warn};

use mailroom_core::ai::{AIBackend, AIClient};
use mailroom_core::circuit_breaker::{BreakerConfig, CircuitBreaker};
use mailroom_core::db::Database;
use mailroom_core::financial::FinancialDetector;
use mailroom_core::pipeline::MessagePipeline;
use mailroom_core::provider::{GmailProvider, MailProvider, MockProvider};
use mailroom_core::spam::{SpamClassifier, SpamPolicy};
use mailroom_core::store::ContentStore;
use mailroom_core::sync::SyncOrchestrator;

mod handlers;
mod scheduler;

pub use scheduler::{start_sync_scheduler, SyncScheduleConfig};

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Header carrying the authenticated user, set by the upstream gateway
pub const USER_HEADER: &str = "x-authenticated-user-email";

/// Environment variable selecting the mail provider (`gmail` or `mock`)
pub const MAIL_PROVIDER_ENV: &str = "MAILROOM_MAIL_PROVIDER";

/// Server configuration
#[derive(Clone, Default)]
pub struct ServerConfig {
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
}

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub config: ServerConfig,
    pub store: ContentStore,
    pub breaker: Arc<CircuitBreaker>,
    pub classifier: Arc<SpamClassifier>,
    pub sync: Arc<SyncOrchestrator>,
}

impl AppState {
    /// Wire every component from environment configuration
    pub fn from_env(db: Database, data_dir: &Path, config: ServerConfig) -> anyhow::Result<Self> {
        let store = ContentStore::from_env(db.clone(), data_dir)?;
        info!(backend = store.backend_name(), "Blob store configured");

        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::from_env()));
        let classifier = Arc::new(SpamClassifier::new(SpamPolicy::load()?));

        let ai = AIClient::from_env();
        match &ai {
            Some(client) => info!(host = %client.host(), model = %client.model(), "AI backend configured"),
            None => info!("AI backend not configured (set OLLAMA_HOST to enable AI extraction)"),
        }

        let provider: Arc<dyn MailProvider> = match std::env::var(MAIL_PROVIDER_ENV)
            .unwrap_or_else(|_| "gmail".to_string())
            .to_lowercase()
            .as_str()
        {
            "gmail" => Arc::new(GmailProvider::from_env(db.clone())),
            "mock" => {
                warn!("Using the in-memory mail provider, no mail will be fetched");
                Arc::new(MockProvider::new())
            }
            other => {
                anyhow::bail!(
                    "Unknown {} '{}'. Valid options: gmail, mock",
                    MAIL_PROVIDER_ENV,
                    other
                )
            }
        };

        Ok(Self::new(db, config, store, breaker, classifier, provider, ai))
    }

    /// Wire components explicitly (tests use this with in-memory collaborators)
    pub fn new(
        db: Database,
        config: ServerConfig,
        store: ContentStore,
        breaker: Arc<CircuitBreaker>,
        classifier: Arc<SpamClassifier>,
        provider: Arc<dyn MailProvider>,
        ai: Option<AIClient>,
    ) -> Self {
        let detector = FinancialDetector::new(db.clone(), store.clone(), breaker.clone(), ai);
        let pipeline = Arc::new(MessagePipeline::new(db.clone(), detector));
        let sync = Arc::new(
            SyncOrchestrator::new(db.clone(), store.clone(), provider, classifier.clone())
                .with_pipeline(pipeline),
        );
        Self {
            db,
            config,
            store,
            breaker,
            classifier,
            sync,
        }
    }
}

/// Extract the acting user from request headers (for audit logging)
///
/// Falls back to "local-dev" when no gateway sits in front of the server.
pub fn get_user_email(headers: &axum::http::HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "local-dev".to_string())
}

/// Success response
#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>, static_dir: Option<&str>) -> Router {
    let api_routes = Router::new()
        // Accounts and sync
        .route(
            "/accounts",
            get(handlers::list_accounts).post(handlers::connect_account),
        )
        .route(
            "/accounts/:id",
            get(handlers::get_account).delete(handlers::disconnect_account),
        )
        .route("/accounts/:id/sync", post(handlers::trigger_sync))
        .route("/accounts/:id/sync-enabled", put(handlers::set_sync_enabled))
        .route("/accounts/:id/messages", get(handlers::list_account_messages))
        // Messages and blobs
        .route("/messages/:id", get(handlers::get_message))
        .route("/messages/:id/read", put(handlers::set_message_read))
        .route("/blobs/:hash", get(handlers::get_blob))
        // Automation
        .route("/automation/configs", get(handlers::list_configs))
        .route(
            "/automation/configs/:module",
            get(handlers::get_config).put(handlers::upsert_config),
        )
        .route(
            "/automation/configs/:module/rules",
            get(handlers::list_rules).post(handlers::create_rule),
        )
        .route("/automation/rules/:id/enabled", put(handlers::set_rule_enabled))
        .route(
            "/automation/rules/:id",
            axum::routing::delete(handlers::delete_rule),
        )
        .route("/automation/logs", get(handlers::list_logs))
        // Financial suggestions
        .route("/suggestions", get(handlers::list_suggestions))
        .route("/suggestions/:id", get(handlers::get_suggestion))
        .route("/suggestions/:id/approve", post(handlers::approve_suggestion))
        .route("/suggestions/:id/reject", post(handlers::reject_suggestion))
        // AI breaker and spam dry-run
        .route("/ai/breaker", get(handlers::breaker_status))
        .route("/ai/breaker/reset", post(handlers::reset_breaker))
        .route("/spam/classify", post(handlers::classify_message))
        // Audit
        .route("/audit", get(handlers::list_audit_log));

    // Build CORS layer
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let cors = if state.config.allowed_origins.is_empty() {
        // Restrictive default: only allow same-origin
        CorsLayer::new()
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    };

    let mut app = Router::new()
        .nest("/api", api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Security headers
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ));

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app
}

/// Start the server
pub async fn serve(
    db: Database,
    data_dir: &Path,
    host: &str,
    port: u16,
    static_dir: Option<&str>,
    config: ServerConfig,
) -> anyhow::Result<()> {
    // Accounts left in `syncing` by a crashed process would never sync again
    match db.recover_interrupted_syncs() {
        Ok(count) if count > 0 => {
            warn!(count, "Recovered interrupted sync(s) from previous server session");
        }
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, "Failed to recover interrupted syncs");
        }
    }

    check_ai_connection().await;

    let state = Arc::new(AppState::from_env(db, data_dir, config)?);

    if let Some(schedule) = SyncScheduleConfig::from_env() {
        start_sync_scheduler(state.db.clone(), state.sync.clone(), schedule);
    }

    let app = create_router(state, static_dir);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Check and log AI backend connection status
async fn check_ai_connection() {
    match AIClient::from_env() {
        Some(client) => {
            if client.health_check().await {
                info!(host = %client.host(), model = %client.model(), "AI backend connected");
            } else {
                warn!(host = %client.host(), "AI backend configured but not responding");
            }
        }
        None => {
            info!("AI backend not configured, financial detection uses heuristics");
        }
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn not_found(msg: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn conflict(msg: &str) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.to_string(),
            internal: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl From<mailroom_core::Error> for AppError {
    fn from(err: mailroom_core::Error) -> Self {
        use mailroom_core::Error;
        match err {
            Error::NotFound(what) => Self::not_found(&format!("{} not found", what)),
            Error::Conflict(msg) => Self::conflict(&msg),
            Error::InvalidRule(msg) | Error::InvalidData(msg) => Self::bad_request(&msg),
            other => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                // Return generic message to client
                message: "An internal error occurred".to_string(),
                internal: Some(other.into()),
            },
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "An internal error occurred".to_string(),
            internal: Some(err),
        }
    }
}

#[cfg(test)]
mod tests;
