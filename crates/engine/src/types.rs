//! Domain types flowing through the pipeline.
//!
//! Everything here is plain serde data: the pipeline checkpoints these types
//! as JSON after every stage and reloads them on resume.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spendshield_ledger::{ExpenditureRecord, NewFlag, PriceStats};

// ──────────────────────────────────────────────
// Extracted document
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    Tender,
    Approval,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice",
            DocumentType::Tender => "tender",
            DocumentType::Approval => "approval",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "invoice" => Some(DocumentType::Invoice),
            "tender" => Some(DocumentType::Tender),
            "approval" => Some(DocumentType::Approval),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One billed line. `item` is accepted as an alias for `description`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(alias = "item")]
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

/// Structured fields read off a submitted document. Produced once per
/// analysis and never modified afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub document_type: DocumentType,
    pub vendor_name: String,
    #[serde(default)]
    pub vendor_id: Option<String>,
    pub amount: Decimal,
    /// ISO 8601 calendar date.
    pub date: String,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub approval_authority: Option<String>,
    pub reference_number: String,
}

// ──────────────────────────────────────────────
// Verification
// ──────────────────────────────────────────────

/// Historical unit-price statistics for one line item. `stats` is `None`
/// when no past record matched the item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemPriceHistory {
    pub description: String,
    pub stats: Option<PriceStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub vendor_exists: bool,
    #[serde(default)]
    pub vendor_id: Option<String>,
    #[serde(default)]
    pub vendor_registration_date: Option<String>,
    /// One entry per line item, in line-item order.
    #[serde(default)]
    pub price_history: Vec<ItemPriceHistory>,
    /// Newest first.
    #[serde(default)]
    pub similar_transactions: Vec<ExpenditureRecord>,
    /// Zero when the vendor is unknown.
    pub vendor_risk_score: Decimal,
}

impl VerificationResult {
    fn first_stats(&self) -> Option<&PriceStats> {
        self.price_history.first().and_then(|h| h.stats.as_ref())
    }

    /// Average for the first line item.
    pub fn historical_avg_price(&self) -> Option<Decimal> {
        self.first_stats().map(|s| s.avg)
    }

    pub fn historical_min_price(&self) -> Option<Decimal> {
        self.first_stats().map(|s| s.min)
    }

    pub fn historical_max_price(&self) -> Option<Decimal> {
        self.first_stats().map(|s| s.max)
    }

    pub fn historical_record_count(&self) -> u64 {
        self.first_stats().map_or(0, |s| s.count)
    }
}

// ──────────────────────────────────────────────
// Anomalies
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    GhostVendor,
    PriceInflation,
    DuplicateInvoice,
    HighRiskVendor,
}

impl FlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagType::GhostVendor => "ghost_vendor",
            FlagType::PriceInflation => "price_inflation",
            FlagType::DuplicateInvoice => "duplicate_invoice",
            FlagType::HighRiskVendor => "high_risk_vendor",
        }
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flag severity. Declaration order is the total order `low < medium < high
/// < critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding produced by an anomaly rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub flag_type: FlagType,
    pub severity: Severity,
    pub description: String,
    pub evidence: serde_json::Map<String, serde_json::Value>,
}

impl AnomalyFlag {
    /// The row shape the ledger persists.
    pub fn to_new_flag(&self) -> NewFlag {
        NewFlag {
            flag_type: self.flag_type.as_str().to_string(),
            severity: self.severity.as_str().to_string(),
            description: self.description.clone(),
            evidence: serde_json::Value::Object(self.evidence.clone()),
        }
    }
}

// ──────────────────────────────────────────────
// Risk assessment
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            "critical" => Some(RiskLevel::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Always within `[0, 100]`.
    pub fraud_risk_score: Decimal,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
}
