use std::future::Future;
use std::sync::Arc;

use rust_decimal::Decimal;

use super::{make_expenditure, make_flag, Fixture, TestResult};
use crate::{CheckpointStore, Ledger, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_insert_same_reference_exactly_one_wins",
        concurrent_insert_same_reference_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_insert_distinct_references_all_succeed",
        concurrent_insert_distinct_references_all_succeed(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_persist_flags_all_rows_kept",
        concurrent_persist_flags_all_rows_kept(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_persist_flags_same_thread_exactly_one_wins",
        concurrent_persist_flags_same_thread_exactly_one_wins(factory).await,
    ));

    results
}

// ── Concurrent insert: exactly one wins ─────────────────────────────────────

/// N tasks insert the same reference number at once. The unique constraint
/// must let exactly one through; the rest get DuplicateReference.
async fn concurrent_insert_same_reference_exactly_one_wins<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory(Fixture::default()).await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let record = make_expenditure(
                "INV-RACE",
                &format!("VND{i:03}"),
                "2024-01-15",
                "paper",
                Some(Decimal::from(40)),
            );
            match s.insert_expenditure(record).await {
                Ok(()) => Ok(true),
                Err(StorageError::DuplicateReference { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }
    Ok(())
}

async fn concurrent_insert_distinct_references_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory(Fixture::default()).await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            s.insert_expenditure(make_expenditure(
                &format!("INV-{i:03}"),
                "VND001",
                "2024-01-15",
                "paper",
                Some(Decimal::from(40)),
            ))
            .await
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
    }

    let records = storage
        .recent_transactions("VND001", N * 2)
        .await
        .map_err(|e| e.to_string())?;
    if records.len() != N {
        return Err(format!("expected {N} records, got {}", records.len()));
    }
    Ok(())
}

/// Parallel analyses writing flags for distinct threads never lose rows or
/// hand out the same flag id twice.
async fn concurrent_persist_flags_all_rows_kept<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory(Fixture::default()).await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let flags = vec![
                make_flag("ghost_vendor", "critical"),
                make_flag("high_risk_vendor", "high"),
            ];
            s.persist_flags(
                &format!("thread-{i}"),
                None,
                None,
                &flags,
                Decimal::from(97),
            )
            .await
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
    }

    let mut ids = Vec::new();
    for i in 0..N {
        let rows = storage
            .flags_for_thread(&format!("thread-{i}"))
            .await
            .map_err(|e| e.to_string())?;
        if rows.len() != 2 {
            return Err(format!("thread-{i}: expected 2 rows, got {}", rows.len()));
        }
        ids.extend(rows.into_iter().map(|r| r.flag_id));
    }
    ids.sort_unstable();
    ids.dedup();
    if ids.len() != N * 2 {
        return Err(format!("expected {} unique ids, got {}", N * 2, ids.len()));
    }

    let audits = storage.list_audits(0).await.map_err(|e| e.to_string())?;
    if audits.len() != N {
        return Err(format!("expected {N} audits, got {}", audits.len()));
    }
    Ok(())
}

// ── Concurrent flag writes for one thread ───────────────────────────────────

/// N tasks write flags for the same thread at once. One write lands; the
/// rest get AlreadyExists and leave no rows behind.
async fn concurrent_persist_flags_same_thread_exactly_one_wins<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory(Fixture::default()).await);

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let flags = vec![
                make_flag("ghost_vendor", "critical"),
                make_flag("high_risk_vendor", "high"),
            ];
            s.persist_flags("thread-shared", None, None, &flags, Decimal::from(97))
                .await
        }));
    }

    let mut written = 0;
    for handle in handles {
        match handle.await.map_err(|e| format!("task panic: {e}"))? {
            Ok(()) => written += 1,
            Err(StorageError::AlreadyExists { kind: "flags", .. }) => {}
            Err(other) => return Err(format!("unexpected error: {other}")),
        }
    }
    if written != 1 {
        return Err(format!("expected exactly 1 write to land, got {written}"));
    }

    let rows = storage
        .flags_for_thread("thread-shared")
        .await
        .map_err(|e| e.to_string())?;
    if rows.len() != 2 {
        return Err(format!("expected 2 rows, got {}", rows.len()));
    }
    Ok(())
}
