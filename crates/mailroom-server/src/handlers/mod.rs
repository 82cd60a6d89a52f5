//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod accounts;
pub mod ai;
pub mod audit;
pub mod automation;
pub mod messages;
pub mod spam;
pub mod suggestions;

// Re-export all handlers for use in router
pub use accounts::*;
pub use ai::*;
pub use audit::*;
pub use automation::*;
pub use messages::*;
pub use spam::*;
pub use suggestions::*;
