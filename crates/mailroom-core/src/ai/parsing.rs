//! JSON parsing helpers for AI backend responses
//!
//! Models often wrap the JSON payload in prose or code fences, so the object
//! between the first `{` and the last `}` is taken.

use crate::error::{Error, Result};

use super::types::DocumentAnalysis;

fn truncate(raw: &str) -> String {
    if raw.len() > 200 {
        let mut end = 200;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &raw[..end])
    } else {
        raw.to_string()
    }
}

/// Slice out the JSON object embedded in a model response
pub fn extract_json(response: &str) -> Result<&str> {
    let response = response.trim();
    match (response.find('{'), response.rfind('}')) {
        (Some(s), Some(e)) if s < e => Ok(&response[s..=e]),
        _ => Err(Error::Ai(format!(
            "No JSON found in AI response | Raw: {}",
            truncate(response)
        ))),
    }
}

/// Parse a document analysis from an AI response
pub fn parse_document_analysis(response: &str) -> Result<DocumentAnalysis> {
    let json_str = extract_json(response)?;
    serde_json::from_str(json_str).map_err(|e| {
        Error::Ai(format!(
            "Invalid document JSON from AI: {} | Raw: {}",
            e,
            truncate(json_str)
        ))
    })
}
