//! Mock AI backend for testing and offline runs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::types::{DocumentAnalysis, DocumentKind};
use super::AIBackend;

/// Mock backend returning a fixed analysis
///
/// Clones share the call counter, so a test can hand a clone to the detector
/// and still observe how many documents reached the model.
#[derive(Clone)]
pub struct MockBackend {
    healthy: bool,
    failing: bool,
    model: String,
    analysis: DocumentAnalysis,
    calls: Arc<AtomicUsize>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            healthy: true,
            failing: false,
            model: "mock".to_string(),
            analysis: DocumentAnalysis {
                kind: DocumentKind::Payment,
                amount: Some(100.0),
                currency: Some("USD".to_string()),
                date: None,
                description: Some("Mock payment".to_string()),
                confidence: 0.8,
            },
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports unhealthy and fails every analysis
    pub fn unhealthy() -> Self {
        Self {
            healthy: false,
            failing: true,
            ..Self::default()
        }
    }

    pub fn with_analysis(mut self, analysis: DocumentAnalysis) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Healthy, but every analysis errors
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Number of `analyze_document` calls so far, across clones
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AIBackend for MockBackend {
    async fn analyze_document(&self, _bytes: &[u8], _mime_type: &str) -> Result<DocumentAnalysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(Error::Ai("mock backend failure".to_string()));
        }
        Ok(self.analysis.clone())
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        "mock://localhost"
    }
}
