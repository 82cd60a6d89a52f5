//! Message and blob handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{get_user_email, AppError, AppState, SuccessResponse};
use mailroom_core::models::{Attachment, Message};
use mailroom_core::store::is_valid_hash;

/// A message with its attachment rows
#[derive(Debug, Serialize)]
pub struct MessageDetail {
    #[serde(flatten)]
    pub message: Message,
    pub attachments: Vec<Attachment>,
}

/// GET /api/messages/:id - Get a message with its attachments
pub async fn get_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<MessageDetail>, AppError> {
    let user_email = get_user_email(&headers);

    let message = state
        .db
        .get_message(id)?
        .ok_or_else(|| AppError::not_found(&format!("Message {} not found", id)))?;
    let attachments = state.db.get_attachments_for_message(id)?;

    state
        .db
        .log_audit(&user_email, "get", Some("message"), Some(id), None)?;

    Ok(Json(MessageDetail {
        message,
        attachments,
    }))
}

/// Request body for the read flag
#[derive(Debug, Deserialize)]
pub struct ReadFlagRequest {
    pub is_read: bool,
}

/// PUT /api/messages/:id/read - Set the read flag
pub async fn set_message_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<ReadFlagRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    let user_email = get_user_email(&headers);

    if !state.db.set_message_read(id, req.is_read)? {
        return Err(AppError::not_found(&format!("Message {} not found", id)));
    }

    state.db.log_audit(
        &user_email,
        "set_read",
        Some("message"),
        Some(id),
        Some(&format!("is_read={}", req.is_read)),
    )?;

    Ok(Json(SuccessResponse { success: true }))
}

/// GET /api/blobs/:hash - Fetch blob bytes by content hash
pub async fn get_blob(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let user_email = get_user_email(&headers);

    if !is_valid_hash(&hash) {
        return Err(AppError::bad_request("Invalid content hash"));
    }

    let bytes = state.store.get(&hash).await?;

    state
        .db
        .log_audit(&user_email, "get", Some("blob"), None, Some(&hash))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::ETAG, format!("\"{}\"", hash)),
        ],
        bytes,
    ))
}
