use std::future::Future;

use rust_decimal::Decimal;

use super::{make_expenditure, make_vendor, Fixture, TestResult};
use crate::{CheckpointStore, Ledger, StorageError};

pub(super) async fn run_history_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "history",
        "recent_transactions_newest_first",
        recent_transactions_newest_first(factory).await,
    ));
    results.push(TestResult::from_result(
        "history",
        "recent_transactions_respects_limit",
        recent_transactions_respects_limit(factory).await,
    ));
    results.push(TestResult::from_result(
        "history",
        "recent_transactions_scoped_to_vendor",
        recent_transactions_scoped_to_vendor(factory).await,
    ));
    results.push(TestResult::from_result(
        "history",
        "reference_lookup_returns_original_record",
        reference_lookup_returns_original_record(factory).await,
    ));
    results.push(TestResult::from_result(
        "history",
        "insert_makes_record_visible",
        insert_makes_record_visible(factory).await,
    ));
    results.push(TestResult::from_result(
        "history",
        "insert_duplicate_reference_rejected",
        insert_duplicate_reference_rejected(factory).await,
    ));

    results
}

fn two_vendor_history() -> Fixture {
    Fixture {
        vendors: vec![
            make_vendor("VND001", "Reliable Office Supplies Inc", "2020-01-15", Decimal::new(1, 1)),
            make_vendor("VND002", "TechPro Solutions", "2019-06-20", Decimal::new(2, 1)),
        ],
        expenditures: vec![
            make_expenditure("INV-A", "VND001", "2023-01-15", "paper", Some(Decimal::from(40))),
            make_expenditure("INV-C", "VND001", "2024-02-10", "paper", Some(Decimal::from(42))),
            make_expenditure("INV-B", "VND001", "2024-02-10", "pens", Some(Decimal::from(3))),
            make_expenditure("INV-D", "VND001", "2023-06-20", "paper", Some(Decimal::from(38))),
            make_expenditure("INV-E", "VND002", "2023-08-15", "consulting", None),
        ],
    }
}

// ── Test implementations ──────────────────────────────────────────────────────

/// Newest first; same-day records are ordered by reference number.
async fn recent_transactions_newest_first<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(two_vendor_history()).await;
    let records = s
        .recent_transactions("VND001", 10)
        .await
        .map_err(|e| e.to_string())?;
    let refs: Vec<&str> = records.iter().map(|r| r.reference_number.as_str()).collect();
    if refs != ["INV-B", "INV-C", "INV-D", "INV-A"] {
        return Err(format!("expected [INV-B, INV-C, INV-D, INV-A], got {refs:?}"));
    }
    Ok(())
}

async fn recent_transactions_respects_limit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(two_vendor_history()).await;
    let records = s
        .recent_transactions("VND001", 2)
        .await
        .map_err(|e| e.to_string())?;
    if records.len() != 2 {
        return Err(format!("expected 2 records, got {}", records.len()));
    }
    if records[0].reference_number != "INV-B" {
        return Err(format!(
            "expected INV-B first, got {}",
            records[0].reference_number
        ));
    }
    Ok(())
}

async fn recent_transactions_scoped_to_vendor<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(two_vendor_history()).await;
    let records = s
        .recent_transactions("VND002", 10)
        .await
        .map_err(|e| e.to_string())?;
    if records.len() != 1 || records[0].reference_number != "INV-E" {
        return Err(format!("expected only INV-E, got {records:?}"));
    }
    let none = s
        .recent_transactions("VND404", 10)
        .await
        .map_err(|e| e.to_string())?;
    if !none.is_empty() {
        return Err(format!("expected no records for VND404, got {}", none.len()));
    }
    Ok(())
}

async fn reference_lookup_returns_original_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(two_vendor_history()).await;
    let found = s
        .reference_number_exists("INV-D")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("INV-D not found")?;
    if found.transaction_date != "2023-06-20" || found.amount != Decimal::from(380) {
        return Err(format!("unexpected record for INV-D: {found:?}"));
    }
    let missing = s
        .reference_number_exists("INV-Z")
        .await
        .map_err(|e| e.to_string())?;
    if missing.is_some() {
        return Err("INV-Z should not exist".to_string());
    }
    Ok(())
}

async fn insert_makes_record_visible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(two_vendor_history()).await;
    s.insert_expenditure(make_expenditure(
        "INV-F",
        "VND002",
        "2024-05-01",
        "consulting",
        Some(Decimal::from(1500)),
    ))
    .await
    .map_err(|e| e.to_string())?;

    if s.reference_number_exists("INV-F")
        .await
        .map_err(|e| e.to_string())?
        .is_none()
    {
        return Err("INV-F not visible after insert".to_string());
    }
    let records = s
        .recent_transactions("VND002", 10)
        .await
        .map_err(|e| e.to_string())?;
    if records.first().map(|r| r.reference_number.as_str()) != Some("INV-F") {
        return Err("INV-F should be the newest VND002 record".to_string());
    }
    Ok(())
}

async fn insert_duplicate_reference_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(two_vendor_history()).await;
    let result = s
        .insert_expenditure(make_expenditure(
            "INV-A",
            "VND002",
            "2024-05-01",
            "consulting",
            Some(Decimal::from(1500)),
        ))
        .await;
    match result {
        Err(StorageError::DuplicateReference { reference_number }) => {
            if reference_number != "INV-A" {
                return Err(format!("expected INV-A in error, got {reference_number}"));
            }
        }
        other => return Err(format!("expected DuplicateReference, got {other:?}")),
    }

    // The original record is untouched.
    let original = s
        .reference_number_exists("INV-A")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("INV-A vanished")?;
    if original.vendor_id.as_deref() != Some("VND001") {
        return Err(format!("INV-A was overwritten: {original:?}"));
    }
    Ok(())
}
