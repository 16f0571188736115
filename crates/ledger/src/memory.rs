//! In-memory reference ledger.
//!
//! Holds every table in a single `tokio::sync::RwLock`, so each trait method
//! is atomic with respect to the others. Used by tests, by the conformance
//! suite, and by the CLI (which loads and saves a [`LedgerSnapshot`] file).

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::date::{months_before, now_rfc3339, parse_date};
use crate::error::StorageError;
use crate::record::{
    AuditSummary, CheckpointRecord, ExpenditureRecord, FlagRecord, NewFlag, PriceStats, Vendor,
};
use crate::traits::{CheckpointStore, Ledger};

/// Serializable image of a [`MemoryLedger`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub vendors: Vec<Vendor>,
    #[serde(default)]
    pub expenditures: Vec<ExpenditureRecord>,
    #[serde(default)]
    pub flags: Vec<FlagRecord>,
    #[serde(default)]
    pub checkpoints: Vec<CheckpointRecord>,
}

#[derive(Debug)]
struct Tables {
    vendors: BTreeMap<String, Vendor>,
    expenditures: Vec<ExpenditureRecord>,
    flags: Vec<FlagRecord>,
    next_flag_id: u64,
    /// Least recently saved first.
    checkpoints: Vec<CheckpointRecord>,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            vendors: BTreeMap::new(),
            expenditures: Vec::new(),
            flags: Vec::new(),
            next_flag_id: 1,
            checkpoints: Vec::new(),
        }
    }
}

/// A ledger kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    tables: RwLock<Tables>,
}

impl MemoryLedger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ledger from a snapshot, enforcing the same key constraints the
    /// write path enforces.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, StorageError> {
        let mut tables = Tables::default();

        for vendor in snapshot.vendors {
            if tables.vendors.contains_key(&vendor.vendor_id) {
                return Err(StorageError::AlreadyExists {
                    kind: "vendor",
                    key: vendor.vendor_id,
                });
            }
            tables.vendors.insert(vendor.vendor_id.clone(), vendor);
        }

        let mut seen = HashSet::new();
        for record in &snapshot.expenditures {
            if !seen.insert(record.reference_number.clone()) {
                return Err(StorageError::DuplicateReference {
                    reference_number: record.reference_number.clone(),
                });
            }
        }
        tables.expenditures = snapshot.expenditures;

        tables.next_flag_id = snapshot
            .flags
            .iter()
            .map(|f| f.flag_id)
            .max()
            .map_or(1, |max| max + 1);
        tables.flags = snapshot.flags;

        for checkpoint in snapshot.checkpoints {
            tables
                .checkpoints
                .retain(|c| c.thread_id != checkpoint.thread_id);
            tables.checkpoints.push(checkpoint);
        }

        Ok(Self {
            tables: RwLock::new(tables),
        })
    }

    /// Copy every table out into a snapshot.
    pub async fn snapshot(&self) -> LedgerSnapshot {
        let tables = self.tables.read().await;
        LedgerSnapshot {
            vendors: tables.vendors.values().cloned().collect(),
            expenditures: tables.expenditures.clone(),
            flags: tables.flags.clone(),
            checkpoints: tables.checkpoints.clone(),
        }
    }

    /// Register a vendor. Fails if the id is taken.
    pub async fn insert_vendor(&self, vendor: Vendor) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        if tables.vendors.contains_key(&vendor.vendor_id) {
            return Err(StorageError::AlreadyExists {
                kind: "vendor",
                key: vendor.vendor_id,
            });
        }
        tables.vendors.insert(vendor.vendor_id.clone(), vendor);
        Ok(())
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn find_vendor_by_id(&self, vendor_id: &str) -> Result<Option<Vendor>, StorageError> {
        Ok(self.tables.read().await.vendors.get(vendor_id).cloned())
    }

    async fn find_vendors_by_name(&self, fragment: &str) -> Result<Vec<Vendor>, StorageError> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Ok(Vec::new());
        }
        // BTreeMap iteration is already ordered by vendor id.
        Ok(self
            .tables
            .read()
            .await
            .vendors
            .values()
            .filter(|v| contains_ignore_case(&v.vendor_name, fragment))
            .cloned()
            .collect())
    }

    async fn historical_price_stats(
        &self,
        item_description: &str,
        lookback_months: u32,
        as_of: &str,
    ) -> Result<Option<PriceStats>, StorageError> {
        let as_of = parse_date(as_of)
            .map_err(|e| StorageError::Backend(format!("invalid as_of date '{as_of}': {e}")))?;
        let cutoff = months_before(as_of, lookback_months);
        let item = item_description.trim();
        if item.is_empty() {
            return Ok(None);
        }

        let tables = self.tables.read().await;
        let mut prices = Vec::new();
        for record in &tables.expenditures {
            let (Some(description), Some(price)) = (&record.item_description, record.unit_price)
            else {
                continue;
            };
            if !contains_ignore_case(description, item) {
                continue;
            }
            let date = parse_date(&record.transaction_date).map_err(|e| {
                StorageError::Backend(format!(
                    "expenditure {} has invalid transaction date '{}': {e}",
                    record.reference_number, record.transaction_date
                ))
            })?;
            if date >= cutoff && date <= as_of {
                prices.push(price);
            }
        }

        if prices.is_empty() {
            return Ok(None);
        }
        let count = prices.len() as u64;
        let sum = prices
            .iter()
            .try_fold(Decimal::ZERO, |acc, p| acc.checked_add(*p))
            .ok_or_else(|| {
                StorageError::Backend(format!("unit price total for '{item}' overflowed"))
            })?;
        let min = prices.iter().copied().min().unwrap_or_default();
        let max = prices.iter().copied().max().unwrap_or_default();
        Ok(Some(PriceStats {
            avg: sum / Decimal::from(count),
            min,
            max,
            count,
        }))
    }

    async fn recent_transactions(
        &self,
        vendor_id: &str,
        limit: usize,
    ) -> Result<Vec<ExpenditureRecord>, StorageError> {
        let tables = self.tables.read().await;
        let mut records: Vec<ExpenditureRecord> = tables
            .expenditures
            .iter()
            .filter(|r| r.vendor_id.as_deref() == Some(vendor_id))
            .cloned()
            .collect();
        // ISO dates sort lexicographically; reference number breaks ties.
        records.sort_by(|a, b| {
            b.transaction_date
                .cmp(&a.transaction_date)
                .then_with(|| a.reference_number.cmp(&b.reference_number))
        });
        records.truncate(limit);
        Ok(records)
    }

    async fn reference_number_exists(
        &self,
        reference_number: &str,
    ) -> Result<Option<ExpenditureRecord>, StorageError> {
        Ok(self
            .tables
            .read()
            .await
            .expenditures
            .iter()
            .find(|r| r.reference_number == reference_number)
            .cloned())
    }

    async fn insert_expenditure(&self, record: ExpenditureRecord) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        if tables
            .expenditures
            .iter()
            .any(|r| r.reference_number == record.reference_number)
        {
            return Err(StorageError::DuplicateReference {
                reference_number: record.reference_number,
            });
        }
        tables.expenditures.push(record);
        Ok(())
    }

    async fn persist_flags(
        &self,
        thread_id: &str,
        vendor_id: Option<&str>,
        reference_number: Option<&str>,
        flags: &[NewFlag],
        fraud_risk_score: Decimal,
    ) -> Result<(), StorageError> {
        let flagged_at = now_rfc3339();
        let mut tables = self.tables.write().await;
        if tables.flags.iter().any(|f| f.thread_id == thread_id) {
            return Err(StorageError::AlreadyExists {
                kind: "flags",
                key: thread_id.to_string(),
            });
        }
        for flag in flags {
            let flag_id = tables.next_flag_id;
            tables.next_flag_id += 1;
            tables.flags.push(FlagRecord {
                flag_id,
                thread_id: thread_id.to_string(),
                vendor_id: vendor_id.map(str::to_string),
                reference_number: reference_number.map(str::to_string),
                flag_type: flag.flag_type.clone(),
                severity: flag.severity.clone(),
                description: flag.description.clone(),
                evidence: flag.evidence.clone(),
                fraud_risk_score,
                flagged_at: flagged_at.clone(),
                reviewed: false,
                reviewer_notes: None,
            });
        }
        Ok(())
    }

    async fn flags_for_thread(&self, thread_id: &str) -> Result<Vec<FlagRecord>, StorageError> {
        let tables = self.tables.read().await;
        let mut flags: Vec<FlagRecord> = tables
            .flags
            .iter()
            .filter(|f| f.thread_id == thread_id)
            .cloned()
            .collect();
        // Flag ids are assigned in write order.
        flags.sort_by(|a, b| b.flag_id.cmp(&a.flag_id));
        Ok(flags)
    }

    async fn list_audits(&self, limit: usize) -> Result<Vec<AuditSummary>, StorageError> {
        let tables = self.tables.read().await;

        // thread_id -> (latest flag, count)
        let mut latest: BTreeMap<&str, (&FlagRecord, usize)> = BTreeMap::new();
        for flag in &tables.flags {
            let entry = latest.entry(flag.thread_id.as_str()).or_insert((flag, 0));
            entry.1 += 1;
            if flag.flag_id > entry.0.flag_id {
                entry.0 = flag;
            }
        }

        let mut rows: Vec<(&FlagRecord, usize)> = latest.into_values().collect();
        rows.sort_by(|(a, _), (b, _)| b.flag_id.cmp(&a.flag_id));
        if limit > 0 {
            rows.truncate(limit);
        }

        Ok(rows
            .into_iter()
            .map(|(flag, count)| AuditSummary {
                thread_id: flag.thread_id.clone(),
                fraud_risk_score: flag.fraud_risk_score,
                anomaly_count: count,
                flagged_at: flag.flagged_at.clone(),
            })
            .collect())
    }

    async fn review_flag(
        &self,
        flag_id: u64,
        notes: Option<&str>,
    ) -> Result<FlagRecord, StorageError> {
        let mut tables = self.tables.write().await;
        let flag = tables
            .flags
            .iter_mut()
            .find(|f| f.flag_id == flag_id)
            .ok_or_else(|| StorageError::NotFound {
                kind: "flag",
                key: flag_id.to_string(),
            })?;
        flag.reviewed = true;
        flag.reviewer_notes = notes.map(str::to_string);
        Ok(flag.clone())
    }
}

#[async_trait]
impl CheckpointStore for MemoryLedger {
    async fn save_checkpoint(
        &self,
        thread_id: &str,
        state: serde_json::Value,
    ) -> Result<(), StorageError> {
        let record = CheckpointRecord {
            thread_id: thread_id.to_string(),
            state,
            saved_at: now_rfc3339(),
        };
        let mut tables = self.tables.write().await;
        tables.checkpoints.retain(|c| c.thread_id != thread_id);
        tables.checkpoints.push(record);
        Ok(())
    }

    async fn load_checkpoint(
        &self,
        thread_id: &str,
    ) -> Result<Option<CheckpointRecord>, StorageError> {
        Ok(self
            .tables
            .read()
            .await
            .checkpoints
            .iter()
            .find(|c| c.thread_id == thread_id)
            .cloned())
    }

    async fn list_checkpoints(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .tables
            .read()
            .await
            .checkpoints
            .iter()
            .rev()
            .map(|c| c.thread_id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expenditure(reference: &str) -> ExpenditureRecord {
        ExpenditureRecord {
            vendor_id: Some("VND001".to_string()),
            document_type: "invoice".to_string(),
            reference_number: reference.to_string(),
            transaction_date: "2024-01-15".to_string(),
            amount: Decimal::from(1000),
            item_description: Some("Printer paper".to_string()),
            quantity: Some(100),
            unit_price: Some(Decimal::from(10)),
            approval_authority: None,
            department: None,
            fiscal_year: Some(2024),
            thread_id: None,
        }
    }

    #[tokio::test]
    async fn price_total_overflow_is_a_backend_error() {
        let ledger = MemoryLedger::new();
        for reference in ["INV-1", "INV-2"] {
            let mut record = expenditure(reference);
            record.unit_price = Some(Decimal::MAX);
            ledger.insert_expenditure(record).await.unwrap();
        }
        match ledger
            .historical_price_stats("Printer paper", 12, "2024-06-01")
            .await
        {
            Err(StorageError::Backend(msg)) => assert!(msg.contains("overflowed"), "{msg}"),
            other => panic!("expected a backend error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_flag_write_for_thread_is_rejected() {
        let ledger = MemoryLedger::new();
        let flag = NewFlag {
            flag_type: "ghost_vendor".to_string(),
            severity: "critical".to_string(),
            description: "unknown vendor".to_string(),
            evidence: serde_json::json!({}),
        };
        ledger
            .persist_flags("t-1", None, None, &[flag.clone()], Decimal::from(40))
            .await
            .unwrap();
        match ledger
            .persist_flags("t-1", None, None, &[flag], Decimal::from(40))
            .await
        {
            Err(StorageError::AlreadyExists { kind, key }) => {
                assert_eq!(kind, "flags");
                assert_eq!(key, "t-1");
            }
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
        assert_eq!(ledger.flags_for_thread("t-1").await.unwrap().len(), 1);
    }

    #[test]
    fn from_snapshot_rejects_duplicate_references() {
        let snapshot = LedgerSnapshot {
            expenditures: vec![expenditure("INV-1"), expenditure("INV-1")],
            ..LedgerSnapshot::default()
        };
        match MemoryLedger::from_snapshot(snapshot) {
            Err(StorageError::DuplicateReference { reference_number }) => {
                assert_eq!(reference_number, "INV-1");
            }
            Err(other) => panic!("expected DuplicateReference, got {other}"),
            Ok(_) => panic!("expected DuplicateReference, got Ok"),
        }
    }

    #[tokio::test]
    async fn snapshot_roundtrip_keeps_flag_id_sequence() {
        let ledger = MemoryLedger::new();
        let flag = NewFlag {
            flag_type: "ghost_vendor".to_string(),
            severity: "critical".to_string(),
            description: "vendor not found in ledger".to_string(),
            evidence: serde_json::json!({}),
        };
        ledger
            .persist_flags("t-1", None, None, &[flag.clone()], Decimal::from(40))
            .await
            .unwrap();

        let restored = MemoryLedger::from_snapshot(ledger.snapshot().await).unwrap();
        restored
            .persist_flags("t-2", None, None, &[flag], Decimal::from(40))
            .await
            .unwrap();

        let ids: Vec<u64> = restored
            .snapshot()
            .await
            .flags
            .iter()
            .map(|f| f.flag_id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn empty_name_fragment_matches_nothing() {
        let ledger = MemoryLedger::new();
        ledger
            .insert_vendor(Vendor {
                vendor_id: "VND001".to_string(),
                vendor_name: "Reliable Office Supplies Inc".to_string(),
                registration_date: "2020-01-15".to_string(),
                business_type: None,
                risk_score: Decimal::ZERO,
                total_contracts: 0,
                total_value: Decimal::ZERO,
                is_blacklisted: false,
            })
            .await
            .unwrap();
        assert!(ledger.find_vendors_by_name("  ").await.unwrap().is_empty());
    }
}
