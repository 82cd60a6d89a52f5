//! Error types for Mailroom

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Policy file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Mail provider rejected the request (bad credentials, revoked access)
    #[error("Mail provider error: {0}")]
    Provider(String),

    /// Mail provider failed in a way worth retrying (timeouts, 429, 5xx)
    #[error("Transient mail provider error: {0}")]
    ProviderTransient(String),

    #[error("Blob backend error: {0}")]
    Blob(String),

    #[error("AI backend error: {0}")]
    Ai(String),
}

impl Error {
    /// Whether the sync loop should retry the operation that produced this error
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ProviderTransient(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
