//! Conformance test suite for `Ledger` + `CheckpointStore` implementations.
//!
//! Any backend can run this suite to check that it answers the pipeline's
//! queries the way the pipeline expects. The suite covers:
//!
//! - **Vendors**: id lookup, name candidates and the exact-match tie-break
//! - **Pricing**: item matching, lookback window, records without unit price
//! - **History**: recent-transaction ordering, reference lookup, unique insert
//! - **Flags**: bulk persist, per-thread listing, audit summaries, review
//! - **Checkpoints**: save, overwrite, load, list
//! - **Concurrency**: racing inserts of one reference, parallel flag writes
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory that builds a
//! fresh backend loaded with the given [`Fixture`] for each test:
//!
//! ```ignore
//! use spendshield_ledger::conformance::run_conformance_suite;
//! use spendshield_ledger::{LedgerSnapshot, MemoryLedger};
//!
//! #[tokio::test]
//! async fn memory_conformance() {
//!     let report = run_conformance_suite(|fixture| async move {
//!         MemoryLedger::from_snapshot(LedgerSnapshot {
//!             vendors: fixture.vendors,
//!             expenditures: fixture.expenditures,
//!             ..LedgerSnapshot::default()
//!         })
//!         .expect("fixture is valid")
//!     })
//!     .await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod checkpoint;
mod concurrent;
mod flags;
mod history;
mod pricing;
mod vendor;

use std::fmt;
use std::future::Future;

use rust_decimal::Decimal;

use crate::record::{ExpenditureRecord, NewFlag, Vendor};
use crate::{CheckpointStore, Ledger};

/// Initial contents handed to the backend factory.
#[derive(Debug, Clone, Default)]
pub struct Fixture {
    pub vendors: Vec<Vendor>,
    pub expenditures: Vec<ExpenditureRecord>,
}

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "vendor", "pricing", "flags").
    pub category: String,
    /// Test name (e.g. "exact_name_beats_substring").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a ledger backend.
///
/// The `factory` is called once per test with that test's fixture, so every
/// test starts from a known, isolated state.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(vendor::run_vendor_tests(&factory).await);
    results.extend(pricing::run_pricing_tests(&factory).await);
    results.extend(history::run_history_tests(&factory).await);
    results.extend(flags::run_flag_tests(&factory).await);
    results.extend(checkpoint::run_checkpoint_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

fn make_vendor(id: &str, name: &str, registration_date: &str, risk_score: Decimal) -> Vendor {
    Vendor {
        vendor_id: id.to_string(),
        vendor_name: name.to_string(),
        registration_date: registration_date.to_string(),
        business_type: Some("General".to_string()),
        risk_score,
        total_contracts: 1,
        total_value: Decimal::from(1000),
        is_blacklisted: false,
    }
}

fn make_expenditure(
    reference: &str,
    vendor_id: &str,
    date: &str,
    item: &str,
    unit_price: Option<Decimal>,
) -> ExpenditureRecord {
    let quantity = 10;
    ExpenditureRecord {
        vendor_id: Some(vendor_id.to_string()),
        document_type: "invoice".to_string(),
        reference_number: reference.to_string(),
        transaction_date: date.to_string(),
        amount: unit_price.map_or(Decimal::from(100), |p| p * Decimal::from(quantity)),
        item_description: Some(item.to_string()),
        quantity: Some(quantity),
        unit_price,
        approval_authority: Some("Test Approver".to_string()),
        department: Some("Testing".to_string()),
        fiscal_year: date.get(..4).and_then(|y| y.parse().ok()),
        thread_id: None,
    }
}

fn make_flag(flag_type: &str, severity: &str) -> NewFlag {
    NewFlag {
        flag_type: flag_type.to_string(),
        severity: severity.to_string(),
        description: format!("{flag_type} test flag"),
        evidence: serde_json::json!({"source": "conformance"}),
    }
}
