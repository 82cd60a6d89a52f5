//! AI backend response types

use serde::{Deserialize, Serialize};

use crate::models::SuggestionKind;

/// What the model thinks a document is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Payment,
    Expense,
    #[default]
    #[serde(other)]
    None,
}

impl DocumentKind {
    pub fn suggestion_kind(&self) -> Option<SuggestionKind> {
        match self {
            DocumentKind::Payment => Some(SuggestionKind::Payment),
            DocumentKind::Expense => Some(SuggestionKind::Expense),
            DocumentKind::None => None,
        }
    }
}

/// Structured extraction of a financial document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DocumentAnalysis {
    #[serde(default)]
    pub kind: DocumentKind,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    /// ISO date as returned by the model, validated by the caller
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Either 0.0-1.0 or 0-100 depending on the model
    #[serde(default)]
    pub confidence: f64,
}

impl DocumentAnalysis {
    /// Confidence on a 0-100 scale
    pub fn confidence_percent(&self) -> i64 {
        let scaled = if self.confidence <= 1.0 {
            self.confidence * 100.0
        } else {
            self.confidence
        };
        scaled.round().clamp(0.0, 100.0) as i64
    }
}
