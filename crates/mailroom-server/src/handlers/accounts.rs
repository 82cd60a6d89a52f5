//! Mail account and sync handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{get_user_email, AppError, AppState, SuccessResponse, MAX_PAGE_LIMIT};
use mailroom_core::models::{MailAccount, Message, NewMailAccount, SyncStatus};
use mailroom_core::sync::SyncOutcome;

/// GET /api/accounts - List linked mailboxes
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<MailAccount>>, AppError> {
    let user_email = get_user_email(&headers);

    let accounts = state.db.list_mail_accounts()?;

    state.db.log_audit(
        &user_email,
        "list",
        Some("mail_account"),
        None,
        Some(&format!("count={}", accounts.len())),
    )?;

    Ok(Json(accounts))
}

/// POST /api/accounts - Connect a mailbox with its OAuth credential pair
pub async fn connect_account(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<NewMailAccount>,
) -> Result<Json<MailAccount>, AppError> {
    let user_email = get_user_email(&headers);

    if req.email.trim().is_empty() || req.provider_account_id.trim().is_empty() {
        return Err(AppError::bad_request(
            "email and provider_account_id are required",
        ));
    }
    if !(1..=120).contains(&req.sync_range_months) {
        return Err(AppError::bad_request(
            "sync_range_months must be between 1 and 120",
        ));
    }

    let id = state.db.upsert_mail_account(&req)?;

    state.db.log_audit(
        &user_email,
        "connect",
        Some("mail_account"),
        Some(id),
        Some(&format!("provider={}, email={}", req.provider, req.email)),
    )?;

    let account = state
        .db
        .get_mail_account(id)?
        .ok_or_else(|| AppError::not_found(&format!("Account {} not found", id)))?;
    Ok(Json(account))
}

/// GET /api/accounts/:id - Get a single account
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<MailAccount>, AppError> {
    let user_email = get_user_email(&headers);

    let account = state
        .db
        .get_mail_account(id)?
        .ok_or_else(|| AppError::not_found(&format!("Account {} not found", id)))?;

    state
        .db
        .log_audit(&user_email, "get", Some("mail_account"), Some(id), None)?;

    Ok(Json(account))
}

/// DELETE /api/accounts/:id - Disconnect a mailbox
///
/// Message and attachment rows go with it; blobs stay in the store.
pub async fn disconnect_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<SuccessResponse>, AppError> {
    let user_email = get_user_email(&headers);

    if !state.db.delete_mail_account(id)? {
        return Err(AppError::not_found(&format!("Account {} not found", id)));
    }

    state
        .db
        .log_audit(&user_email, "disconnect", Some("mail_account"), Some(id), None)?;

    Ok(Json(SuccessResponse { success: true }))
}

/// Response for a sync trigger
#[derive(Debug, Serialize)]
pub struct SyncTriggerResponse {
    pub account_id: i64,
    /// `started` or `already_running`
    pub status: &'static str,
}

/// POST /api/accounts/:id/sync - Start a sync in the background
///
/// A trigger while the account is already syncing is a no-op.
pub async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<SyncTriggerResponse>), AppError> {
    let user_email = get_user_email(&headers);

    let account = state
        .db
        .get_mail_account(id)?
        .ok_or_else(|| AppError::not_found(&format!("Account {} not found", id)))?;

    if account.sync_status == SyncStatus::Syncing {
        return Ok((
            StatusCode::OK,
            Json(SyncTriggerResponse {
                account_id: id,
                status: "already_running",
            }),
        ));
    }

    state
        .db
        .log_audit(&user_email, "sync", Some("mail_account"), Some(id), None)?;

    let sync = state.sync.clone();
    tokio::spawn(async move {
        match sync.sync(id).await {
            Ok(SyncOutcome::Completed(result)) => {
                info!(account_id = id, processed = result.processed, "Triggered sync finished");
            }
            Ok(SyncOutcome::AlreadyRunning) => {}
            Err(e) => warn!(account_id = id, error = %e, "Triggered sync failed"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SyncTriggerResponse {
            account_id: id,
            status: "started",
        }),
    ))
}

/// Request body for toggling sync
#[derive(Debug, Deserialize)]
pub struct SyncEnabledRequest {
    pub enabled: bool,
}

/// PUT /api/accounts/:id/sync-enabled - Toggle scheduled sync
///
/// Turning sync off does not abort a sync already in flight.
pub async fn set_sync_enabled(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<SyncEnabledRequest>,
) -> Result<Json<MailAccount>, AppError> {
    let user_email = get_user_email(&headers);

    if !state.db.set_sync_enabled(id, req.enabled)? {
        return Err(AppError::not_found(&format!("Account {} not found", id)));
    }

    state.db.log_audit(
        &user_email,
        "set_sync_enabled",
        Some("mail_account"),
        Some(id),
        Some(&format!("enabled={}", req.enabled)),
    )?;

    let account = state
        .db
        .get_mail_account(id)?
        .ok_or_else(|| AppError::not_found(&format!("Account {} not found", id)))?;
    Ok(Json(account))
}

/// Query parameters for listing messages
#[derive(Debug, Deserialize)]
pub struct MessageListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    /// Include messages dropped by the spam classifier
    #[serde(default)]
    pub include_filtered: bool,
}

fn default_limit() -> i64 {
    100
}

/// GET /api/accounts/:id/messages - List an account's messages, newest first
pub async fn list_account_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<MessageListQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<Message>>, AppError> {
    let user_email = get_user_email(&headers);

    if state.db.get_mail_account(id)?.is_none() {
        return Err(AppError::not_found(&format!("Account {} not found", id)));
    }

    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);
    let messages =
        state
            .db
            .list_messages(id, params.include_filtered, limit, params.offset.max(0))?;

    state.db.log_audit(
        &user_email,
        "list",
        Some("message"),
        None,
        Some(&format!("account_id={}, count={}", id, messages.len())),
    )?;

    Ok(Json(messages))
}
