//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `accounts` - Mailbox commands (list, enable, disable, remove, sync)
//! - `blobs` - Content store commands (put, get)
//! - `core` - Core commands (init, classify) and shared utilities (open_db)
//! - `rules` - Automation rule commands (list, add, test, delete)
//! - `serve` - Web server command
//! - `status` - Status command
//! - `suggestions` - Financial suggestion review (list, approve, reject)

pub mod accounts;
pub mod blobs;
pub mod core;
pub mod rules;
pub mod serve;
pub mod status;
pub mod suggestions;

// Re-export command functions for main.rs
pub use accounts::*;
pub use blobs::*;
pub use core::*;
pub use rules::*;
pub use serve::*;
pub use status::*;
pub use suggestions::*;

/// Acting user recorded on reviews and audit entries made from the CLI
pub const CLI_USER: &str = "cli";

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
