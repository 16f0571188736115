use std::future::Future;

use rust_decimal::Decimal;

use super::{make_expenditure, make_vendor, Fixture, TestResult};
use crate::record::PriceStats;
use crate::{CheckpointStore, Ledger};

pub(super) async fn run_pricing_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "pricing",
        "stats_aggregate_matching_records",
        stats_aggregate_matching_records(factory).await,
    ));
    results.push(TestResult::from_result(
        "pricing",
        "item_match_is_case_insensitive_substring",
        item_match_is_case_insensitive_substring(factory).await,
    ));
    results.push(TestResult::from_result(
        "pricing",
        "lookback_window_excludes_old_records",
        lookback_window_excludes_old_records(factory).await,
    ));
    results.push(TestResult::from_result(
        "pricing",
        "records_after_as_of_are_excluded",
        records_after_as_of_are_excluded(factory).await,
    ));
    results.push(TestResult::from_result(
        "pricing",
        "records_without_unit_price_are_ignored",
        records_without_unit_price_are_ignored(factory).await,
    ));
    results.push(TestResult::from_result(
        "pricing",
        "no_match_returns_none",
        no_match_returns_none(factory).await,
    ));

    results
}

/// Three paper purchases at 40, 38 and 42, plus unrelated items.
fn paper_history() -> Fixture {
    Fixture {
        vendors: vec![make_vendor(
            "VND001",
            "Reliable Office Supplies Inc",
            "2020-01-15",
            Decimal::new(1, 1),
        )],
        expenditures: vec![
            make_expenditure(
                "INV-2023-001",
                "VND001",
                "2023-01-15",
                "Office supplies - paper, pens, folders",
                Some(Decimal::from(40)),
            ),
            make_expenditure(
                "INV-2023-045",
                "VND001",
                "2023-06-20",
                "Office supplies - paper, pens, folders",
                Some(Decimal::from(38)),
            ),
            make_expenditure(
                "INV-2024-012",
                "VND001",
                "2024-02-10",
                "Office supplies - paper, pens, folders",
                Some(Decimal::from(42)),
            ),
            make_expenditure(
                "INV-2023-090",
                "VND001",
                "2023-09-01",
                "Office desks and chairs",
                Some(Decimal::from(500)),
            ),
        ],
    }
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn stats_aggregate_matching_records<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(paper_history()).await;
    let stats = s
        .historical_price_stats("Office supplies - paper, pens, folders", 24, "2024-06-01")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("expected statistics")?;
    let expected = PriceStats {
        avg: Decimal::from(40),
        min: Decimal::from(38),
        max: Decimal::from(42),
        count: 3,
    };
    if stats != expected {
        return Err(format!("expected {expected:?}, got {stats:?}"));
    }
    Ok(())
}

async fn item_match_is_case_insensitive_substring<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(paper_history()).await;
    let stats = s
        .historical_price_stats("PAPER", 24, "2024-06-01")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("expected statistics for 'PAPER'")?;
    if stats.count != 3 {
        return Err(format!("expected 3 matches, got {}", stats.count));
    }

    // "office" matches both the paper records and the desks
    let broad = s
        .historical_price_stats("office", 24, "2024-06-01")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("expected statistics for 'office'")?;
    if broad.count != 4 || broad.max != Decimal::from(500) {
        return Err(format!("expected 4 matches with max 500, got {broad:?}"));
    }
    Ok(())
}

/// With a 12-month window ending 2024-06-01, only the 2024-02-10 record and
/// the 2023-06-20 record fall inside.
async fn lookback_window_excludes_old_records<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(paper_history()).await;
    let stats = s
        .historical_price_stats("paper", 12, "2024-06-01")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("expected statistics")?;
    if stats.count != 2 || stats.avg != Decimal::from(40) || stats.min != Decimal::from(38) {
        return Err(format!("expected 2 records avg 40 min 38, got {stats:?}"));
    }
    Ok(())
}

async fn records_after_as_of_are_excluded<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(paper_history()).await;
    let stats = s
        .historical_price_stats("paper", 24, "2023-12-31")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("expected statistics")?;
    if stats.count != 2 || stats.max != Decimal::from(40) {
        return Err(format!("expected 2 records max 40, got {stats:?}"));
    }
    Ok(())
}

async fn records_without_unit_price_are_ignored<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let mut fixture = paper_history();
    fixture.expenditures.push(make_expenditure(
        "INV-2024-020",
        "VND001",
        "2024-03-01",
        "Office supplies - paper, pens, folders",
        None,
    ));
    let s = factory(fixture).await;
    let stats = s
        .historical_price_stats("paper", 24, "2024-06-01")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("expected statistics")?;
    if stats.count != 3 {
        return Err(format!("expected 3 priced records, got {}", stats.count));
    }
    Ok(())
}

async fn no_match_returns_none<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(paper_history()).await;
    let stats = s
        .historical_price_stats("Server rack", 24, "2024-06-01")
        .await
        .map_err(|e| e.to_string())?;
    if let Some(stats) = stats {
        return Err(format!("expected None, got {stats:?}"));
    }
    Ok(())
}
