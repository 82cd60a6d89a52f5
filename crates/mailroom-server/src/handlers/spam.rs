//! Spam classifier dry-run

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Deserialize;

use crate::{AppError, AppState};
use mailroom_core::spam::SpamVerdict;

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub sender: String,
    #[serde(default)]
    pub subject: String,
}

/// POST /api/spam/classify - Run the classifier on an ad-hoc sender/subject
pub async fn classify_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClassifyRequest>,
) -> Result<Json<SpamVerdict>, AppError> {
    if req.sender.trim().is_empty() {
        return Err(AppError::bad_request("sender is required"));
    }
    Ok(Json(state.classifier.classify(&req.sender, &req.subject)))
}
