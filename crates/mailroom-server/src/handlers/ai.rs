//! AI circuit breaker handlers

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};

use crate::{get_user_email, AppError, AppState};
use mailroom_core::circuit_breaker::BreakerSnapshot;

/// GET /api/ai/breaker - Current breaker state and counters
pub async fn breaker_status(State(state): State<Arc<AppState>>) -> Json<BreakerSnapshot> {
    Json(state.breaker.snapshot())
}

/// POST /api/ai/breaker/reset - Close the breaker and clear its counters
pub async fn reset_breaker(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BreakerSnapshot>, AppError> {
    let user_email = get_user_email(&headers);
    let before = state.breaker.state();

    state.breaker.reset();

    state.db.log_audit(
        &user_email,
        "reset",
        Some("ai_breaker"),
        None,
        Some(&format!("previous_state={}", before)),
    )?;

    Ok(Json(state.breaker.snapshot()))
}
