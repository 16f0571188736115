use std::future::Future;

use rust_decimal::Decimal;

use super::{make_flag, Fixture, TestResult};
use crate::{CheckpointStore, Ledger, StorageError};

pub(super) async fn run_flag_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "flags",
        "persist_writes_one_row_per_flag",
        persist_writes_one_row_per_flag(factory).await,
    ));
    results.push(TestResult::from_result(
        "flags",
        "persisted_rows_share_thread_context",
        persisted_rows_share_thread_context(factory).await,
    ));
    results.push(TestResult::from_result(
        "flags",
        "flags_for_thread_isolated_by_thread",
        flags_for_thread_isolated_by_thread(factory).await,
    ));
    results.push(TestResult::from_result(
        "flags",
        "flag_ids_are_unique",
        flag_ids_are_unique(factory).await,
    ));
    results.push(TestResult::from_result(
        "flags",
        "second_write_for_thread_rejected",
        second_write_for_thread_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "flags",
        "list_audits_one_row_per_thread",
        list_audits_one_row_per_thread(factory).await,
    ));
    results.push(TestResult::from_result(
        "flags",
        "list_audits_respects_limit",
        list_audits_respects_limit(factory).await,
    ));
    results.push(TestResult::from_result(
        "flags",
        "review_marks_flag_reviewed",
        review_marks_flag_reviewed(factory).await,
    ));
    results.push(TestResult::from_result(
        "flags",
        "review_unknown_flag_not_found",
        review_unknown_flag_not_found(factory).await,
    ));

    results
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn persist_writes_one_row_per_flag<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(Fixture::default()).await;
    let flags = vec![
        make_flag("ghost_vendor", "critical"),
        make_flag("price_inflation", "medium"),
        make_flag("price_inflation", "medium"),
    ];
    s.persist_flags("thread-1", None, Some("INV-1"), &flags, Decimal::from(70))
        .await
        .map_err(|e| e.to_string())?;

    let rows = s
        .flags_for_thread("thread-1")
        .await
        .map_err(|e| e.to_string())?;
    if rows.len() != 3 {
        return Err(format!("expected 3 rows, got {}", rows.len()));
    }
    let inflation = rows
        .iter()
        .filter(|r| r.flag_type == "price_inflation")
        .count();
    if inflation != 2 {
        return Err(format!(
            "identical flags must not be merged: expected 2 price_inflation rows, got {inflation}"
        ));
    }
    Ok(())
}

/// Every row carries the same thread, vendor, reference and score; new rows
/// are unreviewed.
async fn persisted_rows_share_thread_context<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(Fixture::default()).await;
    let score = Decimal::new(375, 1);
    s.persist_flags(
        "thread-ctx",
        Some("VND004"),
        Some("INV-77"),
        &[
            make_flag("high_risk_vendor", "high"),
            make_flag("ghost_vendor", "high"),
        ],
        score,
    )
    .await
    .map_err(|e| e.to_string())?;

    let rows = s
        .flags_for_thread("thread-ctx")
        .await
        .map_err(|e| e.to_string())?;
    for row in &rows {
        if row.thread_id != "thread-ctx"
            || row.vendor_id.as_deref() != Some("VND004")
            || row.reference_number.as_deref() != Some("INV-77")
            || row.fraud_risk_score != score
        {
            return Err(format!("row does not carry the shared context: {row:?}"));
        }
        if row.reviewed || row.reviewer_notes.is_some() {
            return Err(format!("new row should be unreviewed: {row:?}"));
        }
        if row.flagged_at.is_empty() {
            return Err("flagged_at must be set".to_string());
        }
    }
    Ok(())
}

async fn flags_for_thread_isolated_by_thread<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(Fixture::default()).await;
    s.persist_flags("a", None, None, &[make_flag("ghost_vendor", "critical")], Decimal::from(40))
        .await
        .map_err(|e| e.to_string())?;
    s.persist_flags(
        "b",
        None,
        None,
        &[make_flag("duplicate_invoice", "critical")],
        Decimal::from(40),
    )
    .await
    .map_err(|e| e.to_string())?;

    let rows = s.flags_for_thread("a").await.map_err(|e| e.to_string())?;
    if rows.len() != 1 || rows[0].flag_type != "ghost_vendor" {
        return Err(format!("thread a should only see its own flag, got {rows:?}"));
    }
    let empty = s
        .flags_for_thread("never-ran")
        .await
        .map_err(|e| e.to_string())?;
    if !empty.is_empty() {
        return Err(format!("expected no rows, got {}", empty.len()));
    }
    Ok(())
}

async fn flag_ids_are_unique<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(Fixture::default()).await;
    let flags = vec![make_flag("ghost_vendor", "critical"); 4];
    s.persist_flags("t1", None, None, &flags, Decimal::from(100))
        .await
        .map_err(|e| e.to_string())?;
    s.persist_flags("t2", None, None, &flags, Decimal::from(100))
        .await
        .map_err(|e| e.to_string())?;

    let mut ids: Vec<u64> = Vec::new();
    for thread in ["t1", "t2"] {
        let rows = s.flags_for_thread(thread).await.map_err(|e| e.to_string())?;
        ids.extend(rows.iter().map(|r| r.flag_id));
    }
    let total = ids.len();
    ids.sort_unstable();
    ids.dedup();
    if ids.len() != total || total != 8 {
        return Err(format!("expected 8 unique flag ids, got {ids:?} of {total}"));
    }
    Ok(())
}

/// A thread's flags are written once; a repeat write changes nothing.
async fn second_write_for_thread_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(Fixture::default()).await;
    s.persist_flags("once", None, None, &[make_flag("ghost_vendor", "critical")], Decimal::from(40))
        .await
        .map_err(|e| e.to_string())?;

    match s
        .persist_flags(
            "once",
            None,
            None,
            &[make_flag("duplicate_invoice", "critical")],
            Decimal::from(80),
        )
        .await
    {
        Err(StorageError::AlreadyExists { kind: "flags", .. }) => {}
        other => return Err(format!("expected AlreadyExists(flags), got {other:?}")),
    }

    let rows = s.flags_for_thread("once").await.map_err(|e| e.to_string())?;
    if rows.len() != 1 || rows[0].flag_type != "ghost_vendor" {
        return Err(format!("first write must be kept unchanged, got {rows:?}"));
    }
    Ok(())
}

async fn list_audits_one_row_per_thread<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(Fixture::default()).await;
    s.persist_flags(
        "first",
        None,
        None,
        &[
            make_flag("ghost_vendor", "critical"),
            make_flag("high_risk_vendor", "high"),
        ],
        Decimal::from(65),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.persist_flags(
        "second",
        None,
        None,
        &[make_flag("duplicate_invoice", "critical")],
        Decimal::from(40),
    )
    .await
    .map_err(|e| e.to_string())?;

    let audits = s.list_audits(0).await.map_err(|e| e.to_string())?;
    if audits.len() != 2 {
        return Err(format!("expected 2 audits, got {audits:?}"));
    }
    // Written last, so listed first.
    if audits[0].thread_id != "second" || audits[0].anomaly_count != 1 {
        return Err(format!("expected 'second' with 1 flag first, got {:?}", audits[0]));
    }
    if audits[1].thread_id != "first"
        || audits[1].anomaly_count != 2
        || audits[1].fraud_risk_score != Decimal::from(65)
    {
        return Err(format!("unexpected summary for 'first': {:?}", audits[1]));
    }
    Ok(())
}

async fn list_audits_respects_limit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(Fixture::default()).await;
    for i in 0..5 {
        s.persist_flags(
            &format!("thread-{i}"),
            None,
            None,
            &[make_flag("ghost_vendor", "critical")],
            Decimal::from(40),
        )
        .await
        .map_err(|e| e.to_string())?;
    }
    let audits = s.list_audits(3).await.map_err(|e| e.to_string())?;
    if audits.len() != 3 {
        return Err(format!("expected 3 audits, got {}", audits.len()));
    }
    if audits[0].thread_id != "thread-4" {
        return Err(format!("expected thread-4 first, got {}", audits[0].thread_id));
    }
    Ok(())
}

async fn review_marks_flag_reviewed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(Fixture::default()).await;
    s.persist_flags(
        "rev",
        None,
        None,
        &[make_flag("price_inflation", "high")],
        Decimal::from(25),
    )
    .await
    .map_err(|e| e.to_string())?;
    let flag_id = s
        .flags_for_thread("rev")
        .await
        .map_err(|e| e.to_string())?
        .first()
        .map(|f| f.flag_id)
        .ok_or("no flag written")?;

    let reviewed = s
        .review_flag(flag_id, Some("quote on file"))
        .await
        .map_err(|e| e.to_string())?;
    if !reviewed.reviewed || reviewed.reviewer_notes.as_deref() != Some("quote on file") {
        return Err(format!("review not applied: {reviewed:?}"));
    }

    let stored = s.flags_for_thread("rev").await.map_err(|e| e.to_string())?;
    if !stored[0].reviewed {
        return Err("review not persisted".to_string());
    }
    Ok(())
}

async fn review_unknown_flag_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(Fixture::default()).await;
    match s.review_flag(424_242, None).await {
        Err(StorageError::NotFound { kind, .. }) if kind == "flag" => Ok(()),
        other => Err(format!("expected NotFound(flag), got {other:?}")),
    }
}
