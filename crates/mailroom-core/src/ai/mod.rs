//! Pluggable local AI backend abstraction
//!
//! The only task the automation pipeline hands to a model is reading a
//! financial document. Backends run locally (Ollama) or are mocked.
//!
//! # Architecture
//!
//! - `AIBackend` trait: the interface every backend implements
//! - `AIClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backend implementations: `OllamaBackend`, `MockBackend`
//!
//! # Configuration
//!
//! Environment variables:
//! - `AI_BACKEND`: Backend to use (ollama, mock). Default: ollama
//! - `OLLAMA_HOST`: Ollama server URL (required for ollama backend)
//! - `OLLAMA_MODEL`: Text model name (default: llama3.2)
//! - `OLLAMA_VISION_MODEL`: Model for image documents (default: the text model)

mod mock;
mod ollama;
pub mod parsing;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;

pub use mock::MockBackend;
pub use ollama::OllamaBackend;
pub use types::{DocumentAnalysis, DocumentKind};

/// Interface for AI document analysis
#[async_trait]
pub trait AIBackend: Send + Sync {
    /// Extract kind, amount, currency and date from a document
    async fn analyze_document(&self, bytes: &[u8], mime_type: &str) -> Result<DocumentAnalysis>;

    /// Whether the backend is reachable
    async fn health_check(&self) -> bool;

    fn model(&self) -> &str;

    fn host(&self) -> &str;
}

/// Concrete AI client
#[derive(Clone)]
pub enum AIClient {
    /// Ollama backend (HTTP API)
    Ollama(OllamaBackend),
    /// Mock backend for testing
    Mock(MockBackend),
}

impl AIClient {
    /// Create an AI client from environment variables
    ///
    /// Returns None if the selected backend is not configured.
    pub fn from_env() -> Option<Self> {
        let backend = std::env::var("AI_BACKEND").unwrap_or_else(|_| "ollama".to_string());

        match backend.to_lowercase().as_str() {
            "ollama" => OllamaBackend::from_env().map(AIClient::Ollama),
            "mock" => Some(AIClient::Mock(MockBackend::new())),
            _ => {
                tracing::warn!(backend = %backend, "Unknown AI_BACKEND, falling back to ollama");
                OllamaBackend::from_env().map(AIClient::Ollama)
            }
        }
    }

    /// Create an Ollama backend directly
    pub fn ollama(host: &str, model: &str) -> Self {
        AIClient::Ollama(OllamaBackend::new(host, model))
    }

    /// Create a mock backend for testing
    pub fn mock() -> Self {
        AIClient::Mock(MockBackend::new())
    }

    /// Create a new instance with a different model
    pub fn with_model(&self, model: &str) -> Self {
        match self {
            AIClient::Ollama(b) => AIClient::Ollama(b.with_model(model)),
            AIClient::Mock(b) => AIClient::Mock(b.clone().with_model(model)),
        }
    }
}

#[async_trait]
impl AIBackend for AIClient {
    async fn analyze_document(&self, bytes: &[u8], mime_type: &str) -> Result<DocumentAnalysis> {
        match self {
            AIClient::Ollama(b) => b.analyze_document(bytes, mime_type).await,
            AIClient::Mock(b) => b.analyze_document(bytes, mime_type).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            AIClient::Ollama(b) => b.health_check().await,
            AIClient::Mock(b) => b.health_check().await,
        }
    }

    fn model(&self) -> &str {
        match self {
            AIClient::Ollama(b) => b.model(),
            AIClient::Mock(b) => b.model(),
        }
    }

    fn host(&self) -> &str {
        match self {
            AIClient::Ollama(b) => b.host(),
            AIClient::Mock(b) => b.host(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_dispatch_to_mock() {
        let client = AIClient::mock().with_model("tiny");
        assert_eq!(client.model(), "tiny");
        assert!(client.health_check().await);
        let analysis = client.analyze_document(b"x", "application/pdf").await.unwrap();
        assert_eq!(analysis.kind, DocumentKind::Payment);
    }

    #[tokio::test]
    async fn test_mock_failure_and_counter() {
        let mock = MockBackend::failing();
        let client = AIClient::Mock(mock.clone());
        assert!(client.analyze_document(b"x", "image/png").await.is_err());
        assert!(client.analyze_document(b"y", "image/png").await.is_err());
        assert_eq!(mock.calls(), 2);
        assert!(!MockBackend::unhealthy().health_check().await);
    }
}
