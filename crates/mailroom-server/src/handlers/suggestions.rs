//! Financial suggestion review handlers
//!
//! Approve and reject only apply to pending suggestions; anything else is a
//! 409 so two reviewers can't both act on the same suggestion.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use crate::{get_user_email, AppError, AppState, MAX_PAGE_LIMIT};
use mailroom_core::db::SuggestionFilter;
use mailroom_core::models::{FinancialSuggestion, SuggestionStatus};

/// Query parameters for listing suggestions
#[derive(Debug, Deserialize)]
pub struct SuggestionQuery {
    pub status: Option<String>,
    pub operation_id: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// GET /api/suggestions - List suggestions, newest first
pub async fn list_suggestions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SuggestionQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<FinancialSuggestion>>, AppError> {
    let user_email = get_user_email(&headers);

    let status = params
        .status
        .as_deref()
        .map(str::parse::<SuggestionStatus>)
        .transpose()
        .map_err(|e| AppError::bad_request(&e))?;

    let suggestions = state.db.list_suggestions(&SuggestionFilter {
        status,
        operation_id: params.operation_id,
        limit: Some(params.limit.clamp(1, MAX_PAGE_LIMIT)),
    })?;

    state.db.log_audit(
        &user_email,
        "list",
        Some("financial_suggestion"),
        None,
        Some(&format!("count={}", suggestions.len())),
    )?;

    Ok(Json(suggestions))
}

/// GET /api/suggestions/:id
pub async fn get_suggestion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<FinancialSuggestion>, AppError> {
    let user_email = get_user_email(&headers);

    let suggestion = state
        .db
        .get_suggestion(id)?
        .ok_or_else(|| AppError::not_found(&format!("Suggestion {} not found", id)))?;

    state
        .db
        .log_audit(&user_email, "get", Some("financial_suggestion"), Some(id), None)?;

    Ok(Json(suggestion))
}

/// POST /api/suggestions/:id/approve - Approve and create the financial record
pub async fn approve_suggestion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<FinancialSuggestion>, AppError> {
    let user_email = get_user_email(&headers);

    let suggestion = state.db.approve_suggestion(id, &user_email)?;

    state.db.log_audit(
        &user_email,
        "approve",
        Some("financial_suggestion"),
        Some(id),
        Some(&format!(
            "kind={}, amount={:.2} {}",
            suggestion.kind, suggestion.amount, suggestion.currency
        )),
    )?;

    Ok(Json(suggestion))
}

/// Request body for rejecting a suggestion
#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

/// POST /api/suggestions/:id/reject - Reject with an optional reason
pub async fn reject_suggestion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Option<Json<RejectRequest>>,
) -> Result<Json<FinancialSuggestion>, AppError> {
    let user_email = get_user_email(&headers);
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let reason = req.reason.as_deref().map(str::trim).filter(|r| !r.is_empty());

    let suggestion = state.db.reject_suggestion(id, &user_email, reason)?;

    state.db.log_audit(
        &user_email,
        "reject",
        Some("financial_suggestion"),
        Some(id),
        reason,
    )?;

    Ok(Json(suggestion))
}
