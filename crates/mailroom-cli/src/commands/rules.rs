//! Automation rule commands

use std::path::Path;

use anyhow::{bail, Context, Result};
use mailroom_core::automation::{self, DatabaseActionExecutor, MessageView, RuleEngine};
use mailroom_core::db::Database;
use mailroom_core::models::{AutomationConfig, RuleDefinition};

use super::CLI_USER;

fn require_config(db: &Database, module: &str) -> Result<AutomationConfig> {
    match db.get_automation_config(module)? {
        Some(config) => Ok(config),
        None => bail!(
            "No automation config for module '{}'. Run 'mailroom init' or PUT /api/automation/configs/{}",
            module,
            module
        ),
    }
}

pub fn cmd_rules_list(db: &Database, module: &str) -> Result<()> {
    let config = require_config(db, module)?;
    let rules = db.list_rules_for_config(config.id)?;

    if rules.is_empty() {
        println!("No rules for '{}'.", module);
        return Ok(());
    }

    println!();
    println!("{:<5} {:<8} {:<8} {:<30} ACTIONS", "ID", "PRIORITY", "ENABLED", "NAME");
    println!("{}", "─".repeat(72));
    for rule in &rules {
        let actions: Vec<&str> = rule.actions.iter().map(|a| a.action_type()).collect();
        println!(
            "{:<5} {:<8} {:<8} {:<30} {}",
            rule.id,
            rule.priority,
            if rule.is_enabled { "yes" } else { "no" },
            super::truncate(&rule.name, 30),
            actions.join(", ")
        );
    }

    Ok(())
}

pub fn cmd_rules_add(db: &Database, module: &str, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let definition: RuleDefinition =
        serde_json::from_str(&content).context("Invalid rule definition")?;

    let rule = automation::create_rule(db, module, &definition)?;
    db.log_audit(
        CLI_USER,
        "create",
        Some("automation_rule"),
        Some(rule.id),
        Some(&format!("module={}, name={}", module, rule.name)),
    )?;

    println!("✅ Created rule {} '{}' in '{}'", rule.id, rule.name, module);
    Ok(())
}

pub fn cmd_rules_test(db: &Database, module: &str, sender: &str, subject: &str) -> Result<()> {
    let config = require_config(db, module)?;
    let rules = db.list_rules_for_config(config.id)?;

    let engine = RuleEngine::new(DatabaseActionExecutor::new(db.clone()));
    let matched = engine.dry_run(&MessageView::adhoc(sender, subject), &rules);

    if matched.is_empty() {
        println!("No rules would fire.");
    } else {
        println!("Rules that would fire, in order:");
        for (id, name) in matched {
            println!("   {:>4}  {}", id, name);
        }
    }
    Ok(())
}

pub fn cmd_rules_delete(db: &Database, id: i64) -> Result<()> {
    if !db.delete_automation_rule(id)? {
        bail!("Rule {} not found", id);
    }
    db.log_audit(CLI_USER, "delete", Some("automation_rule"), Some(id), None)?;
    println!("✅ Deleted rule {}", id);
    Ok(())
}
