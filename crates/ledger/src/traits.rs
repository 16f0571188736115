use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::StorageError;
use crate::record::{
    AuditSummary, CheckpointRecord, ExpenditureRecord, FlagRecord, NewFlag, PriceStats, Vendor,
};

/// The query interface the fraud pipeline consumes.
///
/// A `Ledger` holds vendors, past expenditures and persisted fraud flags.
/// The pipeline only reads vendors and expenditures; it writes flags (and,
/// optionally, the analyzed document as a new expenditure).
///
/// ## Uniqueness
///
/// Reference numbers are unique across all expenditure records.
/// `insert_expenditure` MUST enforce this at write time and return
/// `StorageError::DuplicateReference` on conflict. `reference_number_exists`
/// is advisory only: two concurrent analyses of the same reference can both
/// observe "absent", and only the insert decides the winner.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so a single ledger can be
/// shared by concurrently running analyses.
#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    // ── Vendors ──────────────────────────────────────────────────────────────

    /// Exact lookup by vendor identifier.
    async fn find_vendor_by_id(&self, vendor_id: &str) -> Result<Option<Vendor>, StorageError>;

    /// All vendors whose name contains `fragment`, case-insensitively,
    /// ordered by vendor id. Surrounding whitespace in `fragment` is ignored
    /// and an empty fragment matches nothing.
    async fn find_vendors_by_name(&self, fragment: &str) -> Result<Vec<Vendor>, StorageError>;

    /// Resolve a single vendor from a name fragment.
    ///
    /// A case-insensitive exact name match wins over substring matches. With
    /// no exact match, a single substring match is returned; several return
    /// `Err(StorageError::AmbiguousVendor)`.
    async fn find_vendor_by_name(&self, fragment: &str) -> Result<Option<Vendor>, StorageError> {
        let candidates = self.find_vendors_by_name(fragment).await?;
        resolve_vendor_name(fragment, candidates)
    }

    // ── Expenditure history ──────────────────────────────────────────────────

    /// Unit-price statistics for records whose item description contains
    /// `item_description` (case-insensitive) and whose transaction date is no
    /// earlier than `lookback_months` before `as_of` (ISO date).
    ///
    /// Returns `Ok(None)` when no record with a unit price matches.
    async fn historical_price_stats(
        &self,
        item_description: &str,
        lookback_months: u32,
        as_of: &str,
    ) -> Result<Option<PriceStats>, StorageError>;

    /// Up to `limit` records for `vendor_id`, newest transaction first.
    async fn recent_transactions(
        &self,
        vendor_id: &str,
        limit: usize,
    ) -> Result<Vec<ExpenditureRecord>, StorageError>;

    /// The existing record carrying `reference_number`, if any.
    async fn reference_number_exists(
        &self,
        reference_number: &str,
    ) -> Result<Option<ExpenditureRecord>, StorageError>;

    /// Insert a new expenditure record.
    ///
    /// Returns `Err(StorageError::DuplicateReference)` if the reference number
    /// is already recorded, whichever thread recorded it.
    async fn insert_expenditure(&self, record: ExpenditureRecord) -> Result<(), StorageError>;

    // ── Flags ────────────────────────────────────────────────────────────────

    /// Write one flag row per entry in `flags`, all sharing the same thread,
    /// vendor, reference and fraud-risk score. All-or-nothing.
    ///
    /// A thread's flags are written once. If rows already exist for
    /// `thread_id`, nothing is written and the call returns
    /// `Err(StorageError::AlreadyExists { kind: "flags", .. })`.
    async fn persist_flags(
        &self,
        thread_id: &str,
        vendor_id: Option<&str>,
        reference_number: Option<&str>,
        flags: &[NewFlag],
        fraud_risk_score: Decimal,
    ) -> Result<(), StorageError>;

    /// Flags written for `thread_id`, most recent first.
    async fn flags_for_thread(&self, thread_id: &str) -> Result<Vec<FlagRecord>, StorageError>;

    /// One summary per thread that has flags, most recent first.
    ///
    /// `limit` of 0 means no limit.
    async fn list_audits(&self, limit: usize) -> Result<Vec<AuditSummary>, StorageError>;

    /// Mark a flag as reviewed, replacing its reviewer notes.
    ///
    /// Returns `Err(StorageError::NotFound)` if the flag does not exist.
    async fn review_flag(
        &self,
        flag_id: u64,
        notes: Option<&str>,
    ) -> Result<FlagRecord, StorageError>;
}

/// Durable storage for pipeline checkpoints, keyed by thread id.
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    /// Save (or overwrite) the checkpoint for `thread_id`.
    async fn save_checkpoint(
        &self,
        thread_id: &str,
        state: serde_json::Value,
    ) -> Result<(), StorageError>;

    /// The latest checkpoint for `thread_id`, if any.
    async fn load_checkpoint(
        &self,
        thread_id: &str,
    ) -> Result<Option<CheckpointRecord>, StorageError>;

    /// Thread ids with a checkpoint, most recently saved first.
    async fn list_checkpoints(&self) -> Result<Vec<String>, StorageError>;
}

/// Apply the name tie-break to candidates returned by `find_vendors_by_name`.
pub fn resolve_vendor_name(
    fragment: &str,
    candidates: Vec<Vendor>,
) -> Result<Option<Vendor>, StorageError> {
    let wanted = fragment.trim().to_lowercase();
    if let Some(exact) = candidates
        .iter()
        .find(|v| v.vendor_name.trim().to_lowercase() == wanted)
    {
        return Ok(Some(exact.clone()));
    }
    match candidates.len() {
        0 => Ok(None),
        1 => Ok(candidates.into_iter().next()),
        _ => Err(StorageError::AmbiguousVendor {
            fragment: fragment.to_string(),
            candidates: candidates.into_iter().map(|v| v.vendor_id).collect(),
        }),
    }
}
