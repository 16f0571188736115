use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A registered vendor as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vendor {
    pub vendor_id: String,
    pub vendor_name: String,
    /// ISO 8601 calendar date (`YYYY-MM-DD`).
    pub registration_date: String,
    #[serde(default)]
    pub business_type: Option<String>,
    /// Vendor risk in `[0, 1]`.
    #[serde(default)]
    pub risk_score: Decimal,
    #[serde(default)]
    pub total_contracts: i64,
    #[serde(default)]
    pub total_value: Decimal,
    #[serde(default)]
    pub is_blacklisted: bool,
}

/// A past transaction. Immutable once written; only ever used as evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenditureRecord {
    #[serde(default)]
    pub vendor_id: Option<String>,
    pub document_type: String,
    /// Globally unique across the ledger.
    pub reference_number: String,
    /// ISO 8601 calendar date (`YYYY-MM-DD`).
    pub transaction_date: String,
    pub amount: Decimal,
    #[serde(default)]
    pub item_description: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
    #[serde(default)]
    pub approval_authority: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub fiscal_year: Option<i32>,
    /// The audit thread that recorded this expenditure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// Aggregate unit-price statistics over matching expenditure records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceStats {
    pub avg: Decimal,
    pub min: Decimal,
    pub max: Decimal,
    pub count: u64,
}

/// A flag to be written by `Ledger::persist_flags`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFlag {
    pub flag_type: String,
    pub severity: String,
    pub description: String,
    pub evidence: serde_json::Value,
}

/// A persisted fraud flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagRecord {
    pub flag_id: u64,
    pub thread_id: String,
    pub vendor_id: Option<String>,
    pub reference_number: Option<String>,
    pub flag_type: String,
    pub severity: String,
    pub description: String,
    pub evidence: serde_json::Value,
    pub fraud_risk_score: Decimal,
    /// RFC 3339 timestamp string.
    pub flagged_at: String,
    #[serde(default)]
    pub reviewed: bool,
    #[serde(default)]
    pub reviewer_notes: Option<String>,
}

/// One row per thread in `Ledger::list_audits`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub thread_id: String,
    pub fraud_risk_score: Decimal,
    pub anomaly_count: usize,
    /// RFC 3339 timestamp of the thread's most recent flag.
    pub flagged_at: String,
}

/// A serialized audit state saved after a pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub thread_id: String,
    pub state: serde_json::Value,
    /// RFC 3339 timestamp string.
    pub saved_at: String,
}
