//! Financial suggestion detection
//!
//! Turns invoices, receipts, and remittance advice arriving by mail into
//! pending payment/expense suggestions. Every AI call goes through the shared
//! circuit breaker; when the breaker denies a call the module's
//! [`AiOptimizationLevel`] decides between the keyword heuristic and skipping.
//!
//! Suggestions are never dropped as duplicates. The insert flags them instead
//! (see [`Database::insert_suggestion_checked`]).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ai::{AIBackend, AIClient, DocumentAnalysis};
use crate::circuit_breaker::CircuitBreaker;
use crate::db::Database;
use crate::document::extract_text;
use crate::error::Result;
use crate::models::{
    to_cents, AiOptimizationLevel, Attachment, AutomationConfig, ExtractionMethod,
    FinancialSuggestion, Message, NewFinancialSuggestion, SuggestionKind,
};
use crate::store::ContentStore;

/// Confidence assigned to keyword-heuristic extractions
pub const HEURISTIC_CONFIDENCE: i64 = 40;

/// Characters after a total-like keyword searched for its amount
const KEYWORD_REACH: usize = 60;

const CURRENCY_CODES: &str = "USD|EUR|GBP|MXN|CAD|JPY|CNY|CHF|AUD|BRL|COP|CLP|PEN|ARS";

const PAYMENT_KEYWORDS: &[&str] = &[
    "payment received",
    "payment confirmation",
    "remittance",
    "receipt",
    "paid",
    "deposit",
    "transfer",
    "comprobante de pago",
    "pago recibido",
];

const EXPENSE_KEYWORDS: &[&str] = &[
    "invoice",
    "bill",
    "amount due",
    "balance due",
    "please pay",
    "freight charges",
    "factura",
    "cargo",
];

fn re_amount() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?:\b(?P<pre>{codes})\s?|(?P<sym>[$€£])\s?)?(?P<num>\d{{1,3}}(?:,\d{{3}})+(?:\.\d{{1,2}})?|\d+(?:\.\d{{1,2}})?)(?:\s?(?P<post>{codes})\b)?",
            codes = CURRENCY_CODES
        ))
        .expect("valid regex")
    })
}

fn re_total_keyword() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(grand total|total due|total a pagar|total|amount due|balance due|amount paid|payment amount|importe|monto)\b",
        )
        .expect("valid regex")
    })
}

fn re_iso_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("valid regex"))
}

fn re_dmy_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("valid regex"))
}

/// A payment or expense read out of a document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    pub kind: SuggestionKind,
    pub amount_cents: i64,
    pub currency: String,
    pub document_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub confidence: i64,
    pub method: ExtractionMethod,
}

impl Extraction {
    /// Convert a model's answer, `None` when it found nothing usable
    pub fn from_analysis(analysis: &DocumentAnalysis) -> Option<Self> {
        let kind = analysis.kind.suggestion_kind()?;
        let amount = analysis.amount.filter(|a| *a > 0.0)?;
        let currency = analysis
            .currency
            .as_deref()
            .map(str::trim)
            .filter(|c| c.len() == 3)?
            .to_uppercase();
        Some(Self {
            kind,
            amount_cents: to_cents(amount),
            currency,
            document_date: analysis
                .date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok()),
            description: analysis.description.clone(),
            confidence: analysis.confidence_percent(),
            method: ExtractionMethod::Ai,
        })
    }
}

struct AmountCandidate {
    start: usize,
    cents: i64,
    currency: Option<String>,
}

fn symbol_currency(symbol: &str) -> Option<&'static str> {
    match symbol {
        "$" => Some("USD"),
        "€" => Some("EUR"),
        "£" => Some("GBP"),
        _ => None,
    }
}

fn amount_candidates(text: &str) -> Vec<AmountCandidate> {
    re_amount()
        .captures_iter(text)
        .filter_map(|caps| {
            let num = caps.name("num")?.as_str();
            let code = caps
                .name("pre")
                .or_else(|| caps.name("post"))
                .map(|m| m.as_str().to_string());
            let currency = code.or_else(|| {
                caps.name("sym")
                    .and_then(|m| symbol_currency(m.as_str()))
                    .map(str::to_string)
            });
            // Bare integers are references, years, or quantities
            if currency.is_none() && !num.contains('.') {
                return None;
            }
            let amount: f64 = num.replace(',', "").parse().ok()?;
            if amount <= 0.0 {
                return None;
            }
            Some(AmountCandidate {
                start: caps.get(0)?.start(),
                cents: to_cents(amount),
                currency,
            })
        })
        .collect()
}

fn heuristic_kind(text: &str) -> Option<SuggestionKind> {
    let lower = text.to_lowercase();
    let score = |keywords: &[&str]| keywords.iter().filter(|k| lower.contains(*k)).count();
    let payment = score(PAYMENT_KEYWORDS);
    let expense = score(EXPENSE_KEYWORDS);
    match payment.cmp(&expense) {
        std::cmp::Ordering::Greater => Some(SuggestionKind::Payment),
        std::cmp::Ordering::Less => Some(SuggestionKind::Expense),
        std::cmp::Ordering::Equal => None,
    }
}

fn heuristic_date(text: &str) -> Option<NaiveDate> {
    let iso = re_iso_date().captures_iter(text).find_map(|c| {
        NaiveDate::from_ymd_opt(c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?)
    });
    iso.or_else(|| {
        re_dmy_date().captures_iter(text).find_map(|c| {
            NaiveDate::from_ymd_opt(c[3].parse().ok()?, c[2].parse().ok()?, c[1].parse().ok()?)
        })
    })
}

/// Keyword extraction used when the AI service is off-limits
///
/// Picks the amount closest after a total-like keyword, or the largest
/// currency-marked amount when there is no such keyword.
pub fn extract_heuristic(text: &str) -> Option<Extraction> {
    let kind = heuristic_kind(text)?;
    let candidates = amount_candidates(text);

    let near_keyword = re_total_keyword()
        .find_iter(text)
        .filter_map(|k| {
            candidates
                .iter()
                .filter(|c| c.start >= k.end() && c.start - k.end() <= KEYWORD_REACH)
                .min_by_key(|c| c.start - k.end())
                .map(|c| (c.start - k.end(), c))
        })
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, c)| c);

    let chosen = near_keyword.or_else(|| {
        candidates
            .iter()
            .filter(|c| c.currency.is_some())
            .max_by_key(|c| c.cents)
    })?;

    // Fall back to the first currency marker anywhere in the document
    let currency = chosen
        .currency
        .clone()
        .or_else(|| candidates.iter().find_map(|c| c.currency.clone()))?;

    Some(Extraction {
        kind,
        amount_cents: chosen.cents,
        currency,
        document_date: heuristic_date(text),
        description: text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(|l| l.chars().take(120).collect()),
        confidence: HEURISTIC_CONFIDENCE,
        method: ExtractionMethod::Heuristic,
    })
}

/// An extraction and the attachment it came from, `None` for the body
type Found = (Extraction, Option<i64>);

/// AI-assisted payment/expense detector
#[derive(Clone)]
pub struct FinancialDetector {
    db: Database,
    store: ContentStore,
    breaker: Arc<CircuitBreaker>,
    ai: Option<AIClient>,
}

impl FinancialDetector {
    pub fn new(
        db: Database,
        store: ContentStore,
        breaker: Arc<CircuitBreaker>,
        ai: Option<AIClient>,
    ) -> Self {
        Self {
            db,
            store,
            breaker,
            ai,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Extract suggestions from a stored message and its attachments
    pub async fn detect(
        &self,
        message: &Message,
        attachments: &[Attachment],
        config: &AutomationConfig,
    ) -> Result<Vec<FinancialSuggestion>> {
        self.detect_for_configs(message, attachments, std::slice::from_ref(config))
            .await
    }

    /// Detect once on behalf of every config that owns the message
    ///
    /// Documents are read once per distinct extraction setting, and each source
    /// document yields at most one suggestion per kind. It is recorded by the
    /// first config that allows the kind, under that config's duplicate window.
    pub async fn detect_for_configs(
        &self,
        message: &Message,
        attachments: &[Attachment],
        configs: &[AutomationConfig],
    ) -> Result<Vec<FinancialSuggestion>> {
        let detecting: Vec<&AutomationConfig> =
            configs.iter().filter(|c| c.detection_enabled()).collect();
        if detecting.is_empty() {
            return Ok(Vec::new());
        }

        let operation_id = self
            .db
            .find_operation_in_text(&message.subject)?
            .map(|op| op.id);

        let mut extracted: HashMap<(bool, AiOptimizationLevel), Vec<Found>> = HashMap::new();
        let mut recorded: HashSet<(Option<i64>, SuggestionKind)> = HashSet::new();
        let mut suggestions = Vec::new();

        for config in detecting {
            let setting = (config.process_attachments, config.ai_optimization_level);
            let found = match extracted.get(&setting) {
                Some(found) => found.clone(),
                None => {
                    let found = self
                        .extract_message(message, attachments, setting.0, setting.1)
                        .await;
                    extracted.insert(setting, found.clone());
                    found
                }
            };

            for (extraction, attachment_id) in found {
                if !config.allows(extraction.kind) {
                    debug!(kind = %extraction.kind, module = %config.module, "Detection disabled for kind");
                    continue;
                }
                if !recorded.insert((attachment_id, extraction.kind)) {
                    debug!(module = %config.module, ?attachment_id, "Already recorded for another module");
                    continue;
                }
                let suggestion = self.db.insert_suggestion_checked(
                    &NewFinancialSuggestion {
                        kind: extraction.kind,
                        amount_cents: extraction.amount_cents,
                        currency: extraction.currency,
                        description: extraction.description,
                        document_date: extraction.document_date,
                        ai_confidence: extraction.confidence,
                        extraction_method: extraction.method,
                        operation_id,
                        source_message_id: Some(message.id),
                        source_attachment_id: attachment_id,
                    },
                    config.duplicate_window_days,
                )?;
                if suggestion.is_duplicate {
                    info!(
                        suggestion_id = suggestion.id,
                        related = ?suggestion.related_suggestion_id,
                        "Flagged duplicate financial suggestion"
                    );
                }
                suggestions.push(suggestion);
            }
        }

        Ok(suggestions)
    }

    /// Read the eligible attachments, or the body when there are none
    async fn extract_message(
        &self,
        message: &Message,
        attachments: &[Attachment],
        process_attachments: bool,
        level: AiOptimizationLevel,
    ) -> Vec<Found> {
        let eligible: Vec<&Attachment> = if process_attachments {
            attachments
                .iter()
                .filter(|a| a.is_financial_document())
                .collect()
        } else {
            Vec::new()
        };

        let mut found = Vec::new();

        if eligible.is_empty() {
            let body = match &message.body_content_hash {
                Some(hash) => match self.store.get(hash).await {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(e) => {
                        warn!(message_id = message.id, error = %e, "Message body unavailable");
                        String::new()
                    }
                },
                None => String::new(),
            };
            let text = format!("{}\n{}", message.subject, body);
            if let Some(extraction) = extract_heuristic(&text) {
                found.push((extraction, None));
            }
        }

        for attachment in eligible {
            let bytes = match self.store.get(&attachment.content_hash).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        attachment_id = attachment.id,
                        error = %e,
                        "Attachment bytes unavailable, skipping"
                    );
                    continue;
                }
            };
            if let Some(extraction) = self
                .extract(&message.subject, &bytes, &attachment.mime_type, level)
                .await
            {
                found.push((extraction, Some(attachment.id)));
            }
        }

        found
    }

    /// Read one document, honoring the breaker and optimization level
    async fn extract(
        &self,
        subject: &str,
        bytes: &[u8],
        mime_type: &str,
        level: AiOptimizationLevel,
    ) -> Option<Extraction> {
        let heuristic = || {
            extract_text(bytes, mime_type)
                .and_then(|text| extract_heuristic(&format!("{}\n{}", subject, text)))
        };

        if level == AiOptimizationLevel::HeuristicOnly {
            return heuristic();
        }

        let ai = match &self.ai {
            Some(ai) if self.breaker.can_make_request() => ai,
            _ => {
                debug!(level = %level, "AI unavailable for document");
                return match level {
                    AiOptimizationLevel::Balanced => heuristic(),
                    _ => None,
                };
            }
        };

        match ai.analyze_document(bytes, mime_type).await {
            Ok(analysis) => {
                self.breaker.record_success();
                Extraction::from_analysis(&analysis)
            }
            Err(e) => {
                self.breaker.record_failure(&e);
                warn!(error = %e, mime_type, "AI document analysis failed, skipping document");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{DocumentKind, MockBackend};
    use crate::db::{NewAttachment, SuggestionFilter};
    use crate::models::{AutomationConfigUpdate, NewMailAccount, NewMessage, SuggestionStatus};
    use crate::store::MemoryBackend;
    use chrono::Utc;
    use std::time::Duration;

    #[test]
    fn test_heuristic_amount_near_total() {
        let text = "Payment received, thank you\nRef NAVI-1042 qty 12\nSubtotal $480.00\nTotal: $500.00\nDate: 2024-03-01";
        let e = extract_heuristic(text).unwrap();
        assert_eq!(e.kind, SuggestionKind::Payment);
        assert_eq!(e.amount_cents, 50_000);
        assert_eq!(e.currency, "USD");
        assert_eq!(e.document_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(e.confidence, HEURISTIC_CONFIDENCE);
        assert_eq!(e.method, ExtractionMethod::Heuristic);
    }

    #[test]
    fn test_heuristic_codes_symbols_and_dates() {
        let e = extract_heuristic("Invoice 4521\nAmount due: 1,250.50 EUR\nIssued 05/03/2024").unwrap();
        assert_eq!(e.kind, SuggestionKind::Expense);
        assert_eq!(e.amount_cents, 125_050);
        assert_eq!(e.currency, "EUR");
        assert_eq!(e.document_date, NaiveDate::from_ymd_opt(2024, 3, 5));

        let e = extract_heuristic("Factura\nTotal MXN 3400").unwrap();
        assert_eq!(e.currency, "MXN");
        assert_eq!(e.amount_cents, 340_000);

        let e = extract_heuristic("Your bill: £12.30 and £80.00").unwrap();
        assert_eq!(e.currency, "GBP");
        assert_eq!(e.amount_cents, 8_000);
    }

    #[test]
    fn test_heuristic_needs_kind_and_amount() {
        assert!(extract_heuristic("Lunch on Friday? Total 3 people").is_none());
        assert!(extract_heuristic("Invoice attached, see PDF").is_none());
        // Payment and expense signals cancel out
        assert!(extract_heuristic("Invoice receipt USD 40.00").is_none());
    }

    #[test]
    fn test_from_analysis() {
        let analysis = DocumentAnalysis {
            kind: DocumentKind::Expense,
            amount: Some(320.5),
            currency: Some("usd".to_string()),
            date: Some("2024-02-30".to_string()),
            description: None,
            confidence: 85.0,
        };
        let e = Extraction::from_analysis(&analysis).unwrap();
        assert_eq!(e.amount_cents, 32_050);
        assert_eq!(e.currency, "USD");
        assert_eq!(e.document_date, None);
        assert_eq!(e.confidence, 85);

        let none = DocumentAnalysis::default();
        assert!(Extraction::from_analysis(&none).is_none());
    }

    struct Fixture {
        db: Database,
        store: ContentStore,
        breaker: Arc<CircuitBreaker>,
        account_id: i64,
    }

    impl Fixture {
        fn new() -> Self {
            let db = Database::in_memory().unwrap();
            let store = ContentStore::new(db.clone(), Arc::new(MemoryBackend::new()));
            let account_id = db
                .upsert_mail_account(&NewMailAccount {
                    provider: "mock".to_string(),
                    provider_account_id: "acct".to_string(),
                    email: "billing@forwarder.example".to_string(),
                    access_token: "t".to_string(),
                    refresh_token: None,
                    token_expires_at: None,
                    sync_range_months: 3,
                })
                .unwrap();
            Self {
                db,
                store,
                breaker: Arc::new(CircuitBreaker::with_params(3, 2, Duration::from_secs(900))),
                account_id,
            }
        }

        fn detector(&self, ai: Option<AIClient>) -> FinancialDetector {
            FinancialDetector::new(self.db.clone(), self.store.clone(), self.breaker.clone(), ai)
        }

        fn config(&self, level: AiOptimizationLevel, process_attachments: bool) -> AutomationConfig {
            self.db
                .upsert_automation_config(
                    "finance",
                    &AutomationConfigUpdate {
                        process_attachments,
                        ai_optimization_level: level,
                        auto_detect_payments: true,
                        auto_detect_expenses: true,
                        selected_account_ids: vec![self.account_id],
                        ..Default::default()
                    },
                )
                .unwrap();
            self.db.get_automation_config("finance").unwrap().unwrap()
        }

        async fn message(
            &self,
            provider_id: &str,
            subject: &str,
            body: &str,
            attachment: Option<(&str, &str, &[u8])>,
        ) -> (Message, Vec<Attachment>) {
            let id = self
                .db
                .upsert_message(&NewMessage {
                    account_id: self.account_id,
                    provider_message_id: provider_id.to_string(),
                    thread_id: None,
                    sender: "billing@customer.example".to_string(),
                    subject: subject.to_string(),
                    snippet: String::new(),
                    received_at: Utc::now(),
                    is_read: false,
                    has_attachments: attachment.is_some(),
                })
                .unwrap()
                .id();
            let body_hash = self.store.put(body.as_bytes()).await.unwrap().hash;
            self.db.set_message_body_hash(id, &body_hash).unwrap();
            if let Some((name, mime, bytes)) = attachment {
                let hash = self.store.put(bytes).await.unwrap().hash;
                self.db
                    .insert_attachment(&NewAttachment {
                        message_id: id,
                        provider_attachment_id: format!("{}-a", provider_id),
                        filename: name.to_string(),
                        mime_type: mime.to_string(),
                        size: bytes.len() as i64,
                        content_hash: hash,
                    })
                    .unwrap();
            }
            (
                self.db.get_message(id).unwrap().unwrap(),
                self.db.get_attachments_for_message(id).unwrap(),
            )
        }
    }

    const RECEIPT_PDF: &[u8] =
        b"%PDF-1.4\nstream\nBT (Payment receipt) Tj ET\nBT (Total: USD 500.00) Tj ET\nBT (Date 2024-03-01) Tj ET\nendstream\n%%EOF";

    #[tokio::test]
    async fn test_heuristic_only_never_calls_ai() {
        let f = Fixture::new();
        let mock = MockBackend::new();
        let detector = f.detector(Some(AIClient::Mock(mock.clone())));
        let config = f.config(AiOptimizationLevel::HeuristicOnly, true);
        let (msg, atts) = f
            .message("m1", "Remittance", "", Some(("r.pdf", "application/pdf", RECEIPT_PDF)))
            .await;

        let suggestions = detector.detect(&msg, &atts, &config).await.unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].extraction_method, ExtractionMethod::Heuristic);
        assert_eq!(suggestions[0].amount_cents, 50_000);
        assert_eq!(suggestions[0].source_attachment_id, Some(atts[0].id));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_balanced_uses_ai_then_falls_back_when_breaker_open() {
        let f = Fixture::new();
        let mock = MockBackend::new().with_analysis(DocumentAnalysis {
            kind: DocumentKind::Payment,
            amount: Some(500.0),
            currency: Some("USD".to_string()),
            date: Some("2024-03-01".to_string()),
            description: Some("Customer payment".to_string()),
            confidence: 0.92,
        });
        let detector = f.detector(Some(AIClient::Mock(mock.clone())));
        let config = f.config(AiOptimizationLevel::Balanced, true);

        let (msg, atts) = f
            .message("m1", "Remittance", "", Some(("r.pdf", "application/pdf", RECEIPT_PDF)))
            .await;
        let first = detector.detect(&msg, &atts, &config).await.unwrap();
        assert_eq!(first[0].extraction_method, ExtractionMethod::Ai);
        assert_eq!(first[0].ai_confidence, 92);
        assert_eq!(mock.calls(), 1);

        for _ in 0..3 {
            f.breaker.record_failure(&"ai down");
        }
        let (msg, atts) = f
            .message("m2", "Remittance", "", Some(("r2.pdf", "application/pdf", RECEIPT_PDF)))
            .await;
        let second = detector.detect(&msg, &atts, &config).await.unwrap();
        assert_eq!(second[0].extraction_method, ExtractionMethod::Heuristic);
        assert_eq!(second[0].ai_confidence, HEURISTIC_CONFIDENCE);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_ai_only_skips_when_denied_and_failures_open_breaker() {
        let f = Fixture::new();
        let mock = MockBackend::failing();
        let detector = f.detector(Some(AIClient::Mock(mock.clone())));
        let config = f.config(AiOptimizationLevel::AiOnly, true);

        for i in 0..4 {
            let (msg, atts) = f
                .message(
                    &format!("m{}", i),
                    "Remittance",
                    "",
                    Some(("r.png", "image/png", format!("img{}", i).as_bytes())),
                )
                .await;
            let found = detector.detect(&msg, &atts, &config).await.unwrap();
            assert!(found.is_empty());
        }

        // Three failures opened the breaker, the fourth document never reached the model
        assert_eq!(mock.calls(), 3);
        assert_eq!(f.breaker.state(), crate::circuit_breaker::CircuitState::Open);
    }

    #[tokio::test]
    async fn test_body_analyzed_when_no_eligible_attachment() {
        let f = Fixture::new();
        let detector = f.detector(None);
        let config = f.config(AiOptimizationLevel::Balanced, false);
        f.db.create_operation("NAVI-1042", "Shipment", None).unwrap();

        let (msg, atts) = f
            .message(
                "m1",
                "Invoice for navi-1042",
                "Please pay the amount due: $1,200.00 by 2024-04-01",
                Some(("inv.pdf", "application/pdf", RECEIPT_PDF)),
            )
            .await;
        let found = detector.detect(&msg, &atts, &config).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, SuggestionKind::Expense);
        assert_eq!(found[0].amount_cents, 120_000);
        assert_eq!(found[0].source_attachment_id, None);
        assert!(found[0].operation_id.is_some());
        assert_eq!(found[0].status, SuggestionStatus::Pending);
    }

    #[tokio::test]
    async fn test_shared_account_reads_documents_once() {
        let f = Fixture::new();
        let mock = MockBackend::new().with_analysis(DocumentAnalysis {
            kind: DocumentKind::Payment,
            amount: Some(500.0),
            currency: Some("USD".to_string()),
            date: Some("2024-03-01".to_string()),
            description: None,
            confidence: 0.9,
        });
        let detector = f.detector(Some(AIClient::Mock(mock.clone())));
        let finance = f.config(AiOptimizationLevel::Balanced, true);
        f.db.upsert_automation_config(
            "treasury",
            &AutomationConfigUpdate {
                process_attachments: true,
                ai_optimization_level: AiOptimizationLevel::Balanced,
                auto_detect_payments: true,
                selected_account_ids: vec![f.account_id],
                ..Default::default()
            },
        )
        .unwrap();
        let treasury = f.db.get_automation_config("treasury").unwrap().unwrap();

        let (msg, atts) = f
            .message("m1", "Remittance", "", Some(("r.pdf", "application/pdf", RECEIPT_PDF)))
            .await;
        let found = detector
            .detect_for_configs(&msg, &atts, &[finance, treasury])
            .await
            .unwrap();

        assert_eq!(mock.calls(), 1);
        assert_eq!(found.len(), 1);
        assert!(!found[0].is_duplicate);
        assert_eq!(
            f.db.list_suggestions(&SuggestionFilter::default()).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_second_occurrence_flagged_duplicate() {
        let f = Fixture::new();
        let detector = f.detector(None);
        let config = f.config(AiOptimizationLevel::HeuristicOnly, true);

        let (m1, a1) = f
            .message("m1", "Payment received", "Total: USD 500.00 on 2024-03-01", None)
            .await;
        let (m2, a2) = f
            .message("m2", "Payment received", "Total: USD 500.00 on 2024-03-02", None)
            .await;

        let first = detector.detect(&m1, &a1, &config).await.unwrap();
        let second = detector.detect(&m2, &a2, &config).await.unwrap();
        assert!(!first[0].is_duplicate);
        assert!(second[0].is_duplicate);
        assert!(!second[0].duplicate_reason.as_deref().unwrap_or("").is_empty());
        assert_eq!(second[0].related_suggestion_id, Some(first[0].id));
    }

    #[tokio::test]
    async fn test_disabled_kind_and_module_produce_nothing() {
        let f = Fixture::new();
        let detector = f.detector(None);
        f.db
            .upsert_automation_config(
                "finance",
                &AutomationConfigUpdate {
                    ai_optimization_level: AiOptimizationLevel::HeuristicOnly,
                    auto_detect_payments: false,
                    auto_detect_expenses: true,
                    selected_account_ids: vec![f.account_id],
                    ..Default::default()
                },
            )
            .unwrap();
        let config = f.db.get_automation_config("finance").unwrap().unwrap();
        let (msg, atts) = f
            .message("m1", "Payment received", "Total: USD 500.00", None)
            .await;
        assert!(detector.detect(&msg, &atts, &config).await.unwrap().is_empty());

        let mut off = config.clone();
        off.is_enabled = false;
        let (msg, atts) = f.message("m2", "Invoice", "Amount due: USD 90.00", None).await;
        assert!(detector.detect(&msg, &atts, &off).await.unwrap().is_empty());
    }
}
