//! Automation config, rule, and log handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use crate::{get_user_email, AppError, AppState, SuccessResponse, MAX_PAGE_LIMIT};
use mailroom_core::automation;
use mailroom_core::models::{
    AutomationConfig, AutomationConfigUpdate, AutomationLog, AutomationRule, RuleDefinition,
};

fn config_or_404(state: &AppState, module: &str) -> Result<AutomationConfig, AppError> {
    state
        .db
        .get_automation_config(module)?
        .ok_or_else(|| AppError::not_found(&format!("Automation config '{}' not found", module)))
}

/// GET /api/automation/configs - List module configs
pub async fn list_configs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<AutomationConfig>>, AppError> {
    let user_email = get_user_email(&headers);
    let configs = state.db.list_automation_configs()?;

    state.db.log_audit(
        &user_email,
        "list",
        Some("automation_config"),
        None,
        Some(&format!("count={}", configs.len())),
    )?;

    Ok(Json(configs))
}

/// GET /api/automation/configs/:module
pub async fn get_config(
    State(state): State<Arc<AppState>>,
    Path(module): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AutomationConfig>, AppError> {
    let user_email = get_user_email(&headers);
    let config = config_or_404(&state, &module)?;

    state.db.log_audit(
        &user_email,
        "get",
        Some("automation_config"),
        Some(config.id),
        Some(&module),
    )?;

    Ok(Json(config))
}

/// PUT /api/automation/configs/:module - Create or replace a module config
pub async fn upsert_config(
    State(state): State<Arc<AppState>>,
    Path(module): Path<String>,
    headers: HeaderMap,
    Json(update): Json<AutomationConfigUpdate>,
) -> Result<Json<AutomationConfig>, AppError> {
    let user_email = get_user_email(&headers);

    if module.trim().is_empty() {
        return Err(AppError::bad_request("Module name is required"));
    }
    if update.duplicate_window_days < 0 {
        return Err(AppError::bad_request(
            "duplicate_window_days must not be negative",
        ));
    }

    let id = state.db.upsert_automation_config(&module, &update)?;

    state.db.log_audit(
        &user_email,
        "upsert",
        Some("automation_config"),
        Some(id),
        Some(&format!(
            "module={}, enabled={}, level={}",
            module, update.is_enabled, update.ai_optimization_level
        )),
    )?;

    Ok(Json(config_or_404(&state, &module)?))
}

/// GET /api/automation/configs/:module/rules - Rules in evaluation order
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    Path(module): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<AutomationRule>>, AppError> {
    let user_email = get_user_email(&headers);
    let config = config_or_404(&state, &module)?;
    let rules = state.db.list_rules_for_config(config.id)?;

    state.db.log_audit(
        &user_email,
        "list",
        Some("automation_rule"),
        None,
        Some(&format!("module={}, count={}", module, rules.len())),
    )?;

    Ok(Json(rules))
}

/// POST /api/automation/configs/:module/rules - Validate and store a rule
///
/// Malformed definitions are rejected with 400 and never stored.
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Path(module): Path<String>,
    headers: HeaderMap,
    Json(definition): Json<RuleDefinition>,
) -> Result<Json<AutomationRule>, AppError> {
    let user_email = get_user_email(&headers);

    let rule = automation::create_rule(&state.db, &module, &definition)?;

    state.db.log_audit(
        &user_email,
        "create",
        Some("automation_rule"),
        Some(rule.id),
        Some(&format!("module={}, name={}", module, rule.name)),
    )?;

    Ok(Json(rule))
}

/// Request body for toggling a rule
#[derive(Debug, Deserialize)]
pub struct RuleEnabledRequest {
    pub enabled: bool,
}

/// PUT /api/automation/rules/:id/enabled
pub async fn set_rule_enabled(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<RuleEnabledRequest>,
) -> Result<Json<AutomationRule>, AppError> {
    let user_email = get_user_email(&headers);

    if !state.db.set_rule_enabled(id, req.enabled)? {
        return Err(AppError::not_found(&format!("Rule {} not found", id)));
    }

    state.db.log_audit(
        &user_email,
        "set_enabled",
        Some("automation_rule"),
        Some(id),
        Some(&format!("enabled={}", req.enabled)),
    )?;

    let rule = state
        .db
        .get_automation_rule(id)?
        .ok_or_else(|| AppError::not_found(&format!("Rule {} not found", id)))?;
    Ok(Json(rule))
}

/// DELETE /api/automation/rules/:id
pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<SuccessResponse>, AppError> {
    let user_email = get_user_email(&headers);

    if !state.db.delete_automation_rule(id)? {
        return Err(AppError::not_found(&format!("Rule {} not found", id)));
    }

    state
        .db
        .log_audit(&user_email, "delete", Some("automation_rule"), Some(id), None)?;

    Ok(Json(SuccessResponse { success: true }))
}

/// Query parameters for the automation log
#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub rule_id: Option<i64>,
    pub message_id: Option<i64>,
    #[serde(default = "default_log_limit")]
    pub limit: i64,
}

fn default_log_limit() -> i64 {
    100
}

/// GET /api/automation/logs - Per-action audit trail, newest first
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LogQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<AutomationLog>>, AppError> {
    let user_email = get_user_email(&headers);
    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);

    let logs = state
        .db
        .list_automation_logs(params.rule_id, params.message_id, limit)?;

    state.db.log_audit(
        &user_email,
        "list",
        Some("automation_log"),
        None,
        Some(&format!("count={}", logs.len())),
    )?;

    Ok(Json(logs))
}
