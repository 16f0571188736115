use std::future::Future;

use rust_decimal::Decimal;

use super::{make_vendor, Fixture, TestResult};
use crate::{CheckpointStore, Ledger, StorageError};

pub(super) async fn run_vendor_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "vendor",
        "find_by_id_returns_stored_vendor",
        find_by_id_returns_stored_vendor(factory).await,
    ));
    results.push(TestResult::from_result(
        "vendor",
        "find_by_unknown_id_returns_none",
        find_by_unknown_id_returns_none(factory).await,
    ));
    results.push(TestResult::from_result(
        "vendor",
        "name_candidates_are_case_insensitive_and_ordered",
        name_candidates_are_case_insensitive_and_ordered(factory).await,
    ));
    results.push(TestResult::from_result(
        "vendor",
        "exact_name_beats_substring",
        exact_name_beats_substring(factory).await,
    ));
    results.push(TestResult::from_result(
        "vendor",
        "several_substring_matches_are_ambiguous",
        several_substring_matches_are_ambiguous(factory).await,
    ));

    results
}

fn office_vendors() -> Fixture {
    Fixture {
        vendors: vec![
            make_vendor("VND003", "Office Depot Partners", "2021-03-10", Decimal::new(3, 1)),
            make_vendor("VND001", "Reliable Office Supplies Inc", "2020-01-15", Decimal::new(1, 1)),
            make_vendor("VND002", "TechPro Solutions", "2019-06-20", Decimal::new(2, 1)),
            make_vendor("VND004", "Office", "2024-11-01", Decimal::new(8, 1)),
        ],
        expenditures: Vec::new(),
    }
}

// ── Test implementations ──────────────────────────────────────────────────────

/// A vendor in the fixture is returned intact by id.
async fn find_by_id_returns_stored_vendor<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let fixture = office_vendors();
    let expected = fixture.vendors[2].clone();
    let s = factory(fixture).await;

    let found = s
        .find_vendor_by_id("VND002")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("VND002 not found")?;
    if found != expected {
        return Err(format!("expected {expected:?}, got {found:?}"));
    }
    Ok(())
}

async fn find_by_unknown_id_returns_none<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(office_vendors()).await;
    let found = s
        .find_vendor_by_id("VND999")
        .await
        .map_err(|e| e.to_string())?;
    if let Some(v) = found {
        return Err(format!("expected None, got {}", v.vendor_id));
    }
    Ok(())
}

/// Name search ignores case and returns candidates ordered by vendor id.
async fn name_candidates_are_case_insensitive_and_ordered<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(office_vendors()).await;
    let found = s
        .find_vendors_by_name("oFFiCe")
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<&str> = found.iter().map(|v| v.vendor_id.as_str()).collect();
    if ids != ["VND001", "VND003", "VND004"] {
        return Err(format!("expected [VND001, VND003, VND004], got {ids:?}"));
    }
    Ok(())
}

/// "office" matches three names, but VND004 is named exactly "Office".
async fn exact_name_beats_substring<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(office_vendors()).await;
    let found = s
        .find_vendor_by_name("office")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("expected a vendor")?;
    if found.vendor_id != "VND004" {
        return Err(format!("expected VND004, got {}", found.vendor_id));
    }

    let single = s
        .find_vendor_by_name("techpro")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("expected TechPro")?;
    if single.vendor_id != "VND002" {
        return Err(format!("expected VND002, got {}", single.vendor_id));
    }
    Ok(())
}

async fn several_substring_matches_are_ambiguous<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(office_vendors()).await;
    match s.find_vendor_by_name("Supplies Inc").await {
        Ok(Some(v)) if v.vendor_id == "VND001" => {}
        other => return Err(format!("expected VND001, got {other:?}")),
    }
    match s.find_vendor_by_name("Office ").await {
        // surrounding whitespace is ignored, so this is an exact match
        Ok(Some(v)) if v.vendor_id == "VND004" => {}
        other => return Err(format!("expected VND004 for padded fragment, got {other:?}")),
    }
    match s.find_vendor_by_name("o").await {
        Err(StorageError::AmbiguousVendor { candidates, .. }) => {
            if candidates.len() < 2 {
                return Err(format!("expected several candidates, got {candidates:?}"));
            }
            Ok(())
        }
        other => Err(format!("expected AmbiguousVendor, got {other:?}")),
    }
}
