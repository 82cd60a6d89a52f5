//! Test utilities for mailroom-core
//!
//! Provides a mock Ollama server that answers document-analysis prompts with
//! canned JSON, for integration tests and local development.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Json, State},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

#[derive(Default)]
struct Recorded {
    last_model: Option<String>,
    last_had_images: bool,
    requests: usize,
}

type Shared = Arc<Mutex<Recorded>>;

/// Mock Ollama server for testing and development
pub struct MockOllamaServer {
    addr: SocketAddr,
    recorded: Shared,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockOllamaServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        let recorded: Shared = Arc::default();
        let app = Router::new()
            .route("/api/tags", get(handle_tags))
            .route("/api/generate", post(handle_generate))
            .with_state(recorded.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            recorded,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn last_model(&self) -> Option<String> {
        self.recorded.lock().unwrap().last_model.clone()
    }

    pub fn last_had_images(&self) -> bool {
        self.recorded.lock().unwrap().last_had_images
    }

    pub fn request_count(&self) -> usize {
        self.recorded.lock().unwrap().requests
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockOllamaServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Ollama tags endpoint response (health check)
async fn handle_tags() -> Json<TagsResponse> {
    Json(TagsResponse {
        models: vec![ModelInfo {
            name: "llama3.2:latest".to_string(),
            modified_at: "2024-01-01T00:00:00Z".to_string(),
            size: 4_000_000_000,
        }],
    })
}

/// Ollama generate endpoint
///
/// Images are answered as a supplier expense. Text documents are inspected
/// after the `Document text:` marker: "payment" or "receipt" yields a payment,
/// "invoice" an expense, "garbled" a non-JSON reply, anything else `none`.
async fn handle_generate(
    State(recorded): State<Shared>,
    Json(request): Json<GenerateRequest>,
) -> Json<GenerateResponse> {
    let has_images = request.images.as_ref().is_some_and(|i| !i.is_empty());
    {
        let mut r = recorded.lock().unwrap();
        r.last_model = Some(request.model.clone());
        r.last_had_images = has_images;
        r.requests += 1;
    }

    let document = request
        .prompt
        .split_once("Document text:")
        .map(|(_, text)| text.to_lowercase())
        .unwrap_or_default();

    let response = if has_images {
        r#"{"kind": "expense", "amount": 1250.00, "currency": "EUR", "date": "2024-03-05", "description": "Freight forwarder invoice", "confidence": 0.88}"#.to_string()
    } else if document.contains("garbled") {
        "Sorry, I cannot read this document.".to_string()
    } else if document.contains("payment") || document.contains("receipt") {
        r#"Result: {"kind": "payment", "amount": 500.0, "currency": "USD", "date": "2024-03-01", "description": "Customer payment", "confidence": 0.92}"#.to_string()
    } else if document.contains("invoice") {
        r#"{"kind": "expense", "amount": 320.5, "currency": "USD", "date": null, "description": "Supplier invoice", "confidence": 85}"#.to_string()
    } else {
        r#"{"kind": "none", "amount": null, "currency": null, "date": null, "description": null, "confidence": 0.3}"#.to_string()
    };

    Json(GenerateResponse {
        model: request.model,
        response,
        done: true,
    })
}

#[derive(Serialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Serialize)]
struct ModelInfo {
    name: String,
    modified_at: String,
    size: u64,
}

#[derive(Deserialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(default)]
    images: Option<Vec<String>>,
}

#[derive(Serialize)]
struct GenerateResponse {
    model: String,
    response: String,
    done: bool,
}
