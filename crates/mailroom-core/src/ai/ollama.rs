//! Ollama backend implementation
//!
//! Documents with an image MIME type go to the vision model with the bytes
//! attached; everything else is reduced to text first and sent to the text
//! model.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::{excerpt, extract_text};
use crate::error::{Error, Result};

use super::parsing::parse_document_analysis;
use super::types::DocumentAnalysis;
use super::AIBackend;

/// Characters of extracted text sent with a prompt
const MAX_PROMPT_TEXT: usize = 6000;

const DOCUMENT_PROMPT: &str = r#"You review documents attached to a logistics company's email.
Decide whether the document records money received from a customer ("payment"),
money owed or paid to a supplier ("expense"), or neither ("none").

Respond with JSON only:
{"kind": "payment" | "expense" | "none", "amount": number or null, "currency": "ISO 4217 code" or null, "date": "YYYY-MM-DD" or null, "description": "short summary" or null, "confidence": 0.0-1.0}

Use the grand total when several amounts appear."#;

/// Ollama backend
#[derive(Clone)]
pub struct OllamaBackend {
    http_client: Client,
    base_url: String,
    model: String,
    vision_model: String,
}

impl OllamaBackend {
    /// Create a new Ollama backend using `model` for both text and images
    pub fn new(base_url: &str, model: &str) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            vision_model: model.to_string(),
        }
    }

    pub fn with_vision_model(mut self, vision_model: &str) -> Self {
        self.vision_model = vision_model.to_string();
        self
    }

    /// Create a new instance with a different text model
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }

    /// Create from environment variables
    ///
    /// `OLLAMA_HOST` is required; `OLLAMA_MODEL` defaults to `llama3.2` and
    /// `OLLAMA_VISION_MODEL` to the text model.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OLLAMA_HOST").ok()?;
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2".to_string());
        let backend = Self::new(&host, &model);
        Some(match std::env::var("OLLAMA_VISION_MODEL") {
            Ok(vision) => backend.with_vision_model(&vision),
            Err(_) => backend,
        })
    }

    pub fn vision_model(&self) -> &str {
        &self.vision_model
    }

    async fn generate(&self, request: &OllamaRequest<'_>) -> Result<String> {
        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Ai(format!(
                "Ollama returned {} for model {}",
                response.status(),
                request.model
            )));
        }

        let body: OllamaResponse = response.json().await?;
        Ok(body.response)
    }
}

/// Request to Ollama API, `images` only for vision models
#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

#[async_trait]
impl AIBackend for OllamaBackend {
    async fn analyze_document(&self, bytes: &[u8], mime_type: &str) -> Result<DocumentAnalysis> {
        let request = if mime_type.to_ascii_lowercase().starts_with("image/") {
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            OllamaRequest {
                model: &self.vision_model,
                prompt: DOCUMENT_PROMPT.to_string(),
                images: Some(vec![encoded]),
                stream: false,
            }
        } else {
            let text = extract_text(bytes, mime_type).ok_or_else(|| {
                Error::Ai(format!("No readable text in {} document", mime_type))
            })?;
            OllamaRequest {
                model: &self.model,
                prompt: format!(
                    "{}\n\nDocument text:\n{}",
                    DOCUMENT_PROMPT,
                    excerpt(&text, MAX_PROMPT_TEXT)
                ),
                images: None,
                stream: false,
            }
        };

        debug!(model = request.model, mime_type, "Analyzing document with Ollama");
        let raw = self.generate(&request).await?;
        parse_document_analysis(&raw)
    }

    async fn health_check(&self) -> bool {
        match self
            .http_client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}
