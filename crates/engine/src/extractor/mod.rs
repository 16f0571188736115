//! Document extractor trait and implementations.
//!
//! A `DocumentExtractor` turns raw document bytes into an
//! [`ExtractedDocument`] plus free-text rationale. Implementations may be
//! slow and non-deterministic; the pipeline wraps every call in a timeout.

mod json;
mod llm;

pub use json::JsonExtractor;
#[cfg(feature = "anthropic")]
pub use llm::AnthropicClient;
pub use llm::{
    parse_response, Attachment, LlmClient, LlmError, LlmExtractor, LlmRequest, Message,
    DEFAULT_MODEL,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spendshield_ledger::date::parse_date;

use crate::error::ExtractionError;
use crate::types::{DocumentType, ExtractedDocument, LineItem};

// ──────────────────────────────────────────────
// Inputs and outputs
// ──────────────────────────────────────────────

/// A submitted document: its name (used to infer the format) and raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl RawDocument {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn format(&self) -> Option<DocumentFormat> {
        DocumentFormat::from_name(&self.name)
    }
}

/// Document formats recognised by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Text,
    Pdf,
    Png,
    Jpeg,
}

impl DocumentFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(DocumentFormat::Json),
            "txt" | "text" | "md" => Some(DocumentFormat::Text),
            "pdf" => Some(DocumentFormat::Pdf),
            "png" => Some(DocumentFormat::Png),
            "jpg" | "jpeg" => Some(DocumentFormat::Jpeg),
            _ => None,
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            DocumentFormat::Json => "application/json",
            DocumentFormat::Text => "text/plain",
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Png => "image/png",
            DocumentFormat::Jpeg => "image/jpeg",
        }
    }
}

/// What an extractor produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub document: ExtractedDocument,
    pub rationale: String,
}

// ──────────────────────────────────────────────
// Trait
// ──────────────────────────────────────────────

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, document: &RawDocument) -> Result<Extraction, ExtractionError>;
}

// ──────────────────────────────────────────────
// StaticExtractor
// ──────────────────────────────────────────────

/// Returns the same result for every document. Useful for tests and for
/// replaying a known extraction.
pub struct StaticExtractor {
    result: Result<Extraction, ExtractionError>,
}

impl StaticExtractor {
    pub fn new(extraction: Extraction) -> Self {
        Self {
            result: Ok(extraction),
        }
    }

    pub fn document(document: ExtractedDocument) -> Self {
        Self::new(Extraction {
            document,
            rationale: "Supplied directly".to_string(),
        })
    }

    pub fn failing(error: ExtractionError) -> Self {
        Self { result: Err(error) }
    }
}

#[async_trait]
impl DocumentExtractor for StaticExtractor {
    async fn extract(&self, _document: &RawDocument) -> Result<Extraction, ExtractionError> {
        self.result.clone()
    }
}

// ──────────────────────────────────────────────
// Validation
// ──────────────────────────────────────────────

/// Loose shape of extractor output before validation. Every field is
/// optional here so a missing field is reported by name instead of as a
/// generic deserialization failure.
#[derive(Debug, Deserialize)]
struct RawExtraction {
    document_type: Option<String>,
    vendor_name: Option<String>,
    vendor_id: Option<String>,
    amount: Option<Decimal>,
    date: Option<String>,
    #[serde(default)]
    line_items: Vec<RawLineItem>,
    approval_authority: Option<String>,
    reference_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLineItem {
    #[serde(alias = "item")]
    description: Option<String>,
    quantity: Option<Decimal>,
    unit_price: Option<Decimal>,
}

fn required(value: Option<String>, field: &str) -> Result<String, ExtractionError> {
    match value.map(|s| s.trim().to_string()) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(ExtractionError::invalid(field, "missing or empty")),
    }
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn non_negative(value: Option<Decimal>, field: &str) -> Result<Decimal, ExtractionError> {
    let value = value.ok_or_else(|| ExtractionError::invalid(field, "missing"))?;
    if value < Decimal::ZERO {
        return Err(ExtractionError::invalid(field, format!("{value} is negative")));
    }
    Ok(value)
}

/// Validate extractor JSON into an [`ExtractedDocument`].
///
/// Missing or empty required fields, unknown document types, unparseable
/// dates and negative amounts are rejected. Nothing is filled in with a
/// placeholder.
pub fn validate_extracted(value: serde_json::Value) -> Result<ExtractedDocument, ExtractionError> {
    if !value.is_object() {
        return Err(ExtractionError::Malformed(
            "expected a JSON object".to_string(),
        ));
    }
    let raw: RawExtraction =
        serde_json::from_value(value).map_err(|e| ExtractionError::Malformed(e.to_string()))?;

    let document_type_raw = required(raw.document_type, "document_type")?;
    let document_type = DocumentType::parse(&document_type_raw).ok_or_else(|| {
        ExtractionError::invalid(
            "document_type",
            format!("'{document_type_raw}' is not one of invoice, tender, approval"),
        )
    })?;

    let date = required(raw.date, "date")?;
    let parsed = parse_date(&date)
        .map_err(|e| ExtractionError::invalid("date", format!("'{date}': {e}")))?;

    let mut line_items = Vec::with_capacity(raw.line_items.len());
    for (i, item) in raw.line_items.into_iter().enumerate() {
        line_items.push(LineItem {
            description: required(item.description, &format!("line_items[{i}].description"))?,
            quantity: non_negative(item.quantity, &format!("line_items[{i}].quantity"))?,
            unit_price: non_negative(item.unit_price, &format!("line_items[{i}].unit_price"))?,
        });
    }

    Ok(ExtractedDocument {
        document_type,
        vendor_name: required(raw.vendor_name, "vendor_name")?,
        vendor_id: optional(raw.vendor_id),
        amount: non_negative(raw.amount, "amount")?,
        date: parsed.to_string(),
        line_items,
        approval_authority: optional(raw.approval_authority),
        reference_number: required(raw.reference_number, "reference_number")?,
    })
}

/// Strip a surrounding markdown code fence, if present.
pub(crate) fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();

    // Handle ```json ... ``` or ``` ... ```
    if let Some(stripped) = trimmed.strip_prefix("```json") {
        if let Some(inner) = stripped.strip_suffix("```") {
            return inner.trim();
        }
    }
    if let Some(stripped) = trimmed.strip_prefix("```") {
        if let Some(inner) = stripped.strip_suffix("```") {
            return inner.trim();
        }
    }

    trimmed
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
