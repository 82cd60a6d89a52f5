//! Financial suggestion review commands

use anyhow::{Context, Result};
use mailroom_core::db::{Database, SuggestionFilter};
use mailroom_core::models::{FinancialSuggestion, SuggestionStatus};

use super::{truncate, CLI_USER};

fn print_suggestion(s: &FinancialSuggestion) {
    let date = s
        .document_date
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".to_string());
    let dup = if s.is_duplicate { " ⚠️ dup" } else { "" };
    println!(
        "{:<5} {:<8} {:>12.2} {:<4} {:<10} {:>3}% {:<10} {}{}",
        s.id,
        s.kind.as_str(),
        s.amount,
        s.currency,
        date,
        s.ai_confidence,
        s.status.as_str(),
        truncate(s.description.as_deref().unwrap_or(""), 30),
        dup
    );
}

pub fn cmd_suggestions_list(db: &Database, status: &str, limit: i64) -> Result<()> {
    let status = match status {
        "all" => None,
        other => Some(
            other
                .parse::<SuggestionStatus>()
                .map_err(|e: String| anyhow::anyhow!(e))?,
        ),
    };

    let suggestions = db.list_suggestions(&SuggestionFilter {
        status,
        operation_id: None,
        limit: Some(limit),
    })?;

    if suggestions.is_empty() {
        println!("No suggestions.");
        return Ok(());
    }

    println!();
    for s in &suggestions {
        print_suggestion(s);
    }
    Ok(())
}

pub fn cmd_suggestions_approve(db: &Database, id: i64) -> Result<()> {
    let s = db
        .approve_suggestion(id, CLI_USER)
        .with_context(|| format!("Cannot approve suggestion {}", id))?;
    db.log_audit(CLI_USER, "approve", Some("financial_suggestion"), Some(id), None)?;

    println!("✅ Approved {} {:.2} {}", s.kind, s.amount, s.currency);
    Ok(())
}

pub fn cmd_suggestions_reject(db: &Database, id: i64, reason: Option<&str>) -> Result<()> {
    db.reject_suggestion(id, CLI_USER, reason)
        .with_context(|| format!("Cannot reject suggestion {}", id))?;
    db.log_audit(CLI_USER, "reject", Some("financial_suggestion"), Some(id), reason)?;

    println!("✅ Rejected suggestion {}", id);
    Ok(())
}
