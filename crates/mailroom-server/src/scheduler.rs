//! Background scheduler for periodic mailbox sync
//!
//! Enabled via environment variables:
//!
//! - `MAILROOM_SYNC_SCHEDULE_MINUTES`: Interval in minutes between sync rounds
//!
//! Each round syncs every account with sync enabled. Accounts already syncing
//! are skipped by the orchestrator, so a slow round never overlaps itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info, warn};

use mailroom_core::sync::{SyncOrchestrator, SyncOutcome};
use mailroom_core::Database;

const SCHEDULE_ENV: &str = "MAILROOM_SYNC_SCHEDULE_MINUTES";

/// Configuration for scheduled sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncScheduleConfig {
    /// Interval between sync rounds in minutes
    pub interval_minutes: u64,
}

impl SyncScheduleConfig {
    /// Parse configuration from environment variables
    ///
    /// Returns None if scheduling is not configured
    pub fn from_env() -> Option<Self> {
        Self::parse(std::env::var(SCHEDULE_ENV).ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Option<Self> {
        let interval_minutes: u64 = value.and_then(|s| s.trim().parse().ok())?;

        if interval_minutes == 0 {
            warn!("{} is 0, scheduled sync disabled", SCHEDULE_ENV);
            return None;
        }

        Some(Self { interval_minutes })
    }
}

/// Start the sync scheduler as a background task
pub fn start_sync_scheduler(
    db: Database,
    sync: Arc<SyncOrchestrator>,
    config: SyncScheduleConfig,
) {
    info!(
        interval_minutes = config.interval_minutes,
        "Starting sync scheduler"
    );

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(config.interval_minutes * 60));

        // Skip the first immediate tick; startup syncs are triggered explicitly
        ticker.tick().await;

        loop {
            ticker.tick().await;
            run_scheduled_round(&db, &sync);
        }
    });
}

/// Spawn one sync per enabled account
fn run_scheduled_round(db: &Database, sync: &Arc<SyncOrchestrator>) {
    let accounts = match db.list_sync_enabled_accounts() {
        Ok(accounts) => accounts,
        Err(e) => {
            error!(error = %e, "Failed to list accounts for scheduled sync");
            return;
        }
    };

    info!(accounts = accounts.len(), "Running scheduled sync round");

    for account in accounts {
        let sync = sync.clone();
        tokio::spawn(async move {
            match sync.sync(account.id).await {
                Ok(SyncOutcome::Completed(result)) => info!(
                    account_id = account.id,
                    newly_synced = result.newly_synced,
                    spam_filtered = result.spam_filtered,
                    "Scheduled sync completed"
                ),
                Ok(SyncOutcome::AlreadyRunning) => {
                    info!(account_id = account.id, "Sync already running, skipped");
                }
                Err(e) => error!(account_id = account.id, error = %e, "Scheduled sync failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_not_set() {
        assert!(SyncScheduleConfig::parse(None).is_none());
    }

    #[test]
    fn test_parse_zero_disables() {
        assert!(SyncScheduleConfig::parse(Some("0")).is_none());
    }

    #[test]
    fn test_parse_garbage() {
        assert!(SyncScheduleConfig::parse(Some("hourly")).is_none());
    }

    #[test]
    fn test_parse_minutes() {
        assert_eq!(
            SyncScheduleConfig::parse(Some(" 15 ")),
            Some(SyncScheduleConfig {
                interval_minutes: 15
            })
        );
    }
}
