//! Plain-text extraction from stored documents
//!
//! Only what is cheap and dependency-free: text parts are decoded lossily and
//! PDFs yield the literal strings of their uncompressed text objects. Scanned
//! or compressed PDFs come back empty and are left to the vision model.

use std::sync::OnceLock;

use regex::Regex;

fn re_text_object() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\bBT\b(.*?)\bET\b").expect("valid regex"))
}

fn re_literal() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(((?:[^()\\]|\\.)*)\)").expect("valid regex"))
}

/// Best-effort text for a document, `None` when nothing readable was found
pub fn extract_text(bytes: &[u8], mime_type: &str) -> Option<String> {
    let mime = mime_type.to_ascii_lowercase();
    let text = if mime.starts_with("text/") {
        String::from_utf8_lossy(bytes).into_owned()
    } else if mime == "application/pdf" {
        pdf_text(bytes)
    } else {
        return None;
    };

    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn pdf_text(bytes: &[u8]) -> String {
    let raw = String::from_utf8_lossy(bytes);
    let mut lines = Vec::new();

    for block in re_text_object().captures_iter(&raw) {
        let line: Vec<String> = re_literal()
            .captures_iter(&block[1])
            .map(|c| unescape_pdf_literal(&c[1]))
            .filter(|s| !s.trim().is_empty())
            .collect();
        if !line.is_empty() {
            lines.push(line.join(" "));
        }
    }

    lines.join("\n")
}

fn unescape_pdf_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('r') => out.push(' '),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Truncate to at most `max_chars` characters
pub fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
