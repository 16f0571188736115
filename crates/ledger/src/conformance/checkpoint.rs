use std::future::Future;

use super::{Fixture, TestResult};
use crate::{CheckpointStore, Ledger};

pub(super) async fn run_checkpoint_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "checkpoint",
        "load_missing_returns_none",
        load_missing_returns_none(factory).await,
    ));
    results.push(TestResult::from_result(
        "checkpoint",
        "save_then_load_roundtrips_state",
        save_then_load_roundtrips_state(factory).await,
    ));
    results.push(TestResult::from_result(
        "checkpoint",
        "save_overwrites_previous_state",
        save_overwrites_previous_state(factory).await,
    ));
    results.push(TestResult::from_result(
        "checkpoint",
        "list_most_recently_saved_first",
        list_most_recently_saved_first(factory).await,
    ));

    results
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn load_missing_returns_none<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(Fixture::default()).await;
    let loaded = s.load_checkpoint("nope").await.map_err(|e| e.to_string())?;
    if loaded.is_some() {
        return Err("expected no checkpoint".to_string());
    }
    Ok(())
}

async fn save_then_load_roundtrips_state<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(Fixture::default()).await;
    let state = serde_json::json!({
        "thread_id": "t-1",
        "current_stage": "verified",
        "errors": ["Extraction error: timed out"],
        "score": "37.5",
    });
    s.save_checkpoint("t-1", state.clone())
        .await
        .map_err(|e| e.to_string())?;

    let loaded = s
        .load_checkpoint("t-1")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("checkpoint not found after save")?;
    if loaded.thread_id != "t-1" {
        return Err(format!("expected thread t-1, got {}", loaded.thread_id));
    }
    if loaded.state != state {
        return Err(format!("state changed in storage: {}", loaded.state));
    }
    if loaded.saved_at.is_empty() {
        return Err("saved_at must be set".to_string());
    }
    Ok(())
}

async fn save_overwrites_previous_state<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(Fixture::default()).await;
    s.save_checkpoint("t-1", serde_json::json!({"current_stage": "extracted"}))
        .await
        .map_err(|e| e.to_string())?;
    s.save_checkpoint("t-1", serde_json::json!({"current_stage": "verified"}))
        .await
        .map_err(|e| e.to_string())?;

    let loaded = s
        .load_checkpoint("t-1")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("checkpoint not found")?;
    if loaded.state["current_stage"] != "verified" {
        return Err(format!("expected latest state, got {}", loaded.state));
    }
    let listed = s.list_checkpoints().await.map_err(|e| e.to_string())?;
    if listed != ["t-1"] {
        return Err(format!("expected a single listed thread, got {listed:?}"));
    }
    Ok(())
}

async fn list_most_recently_saved_first<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: Ledger + CheckpointStore,
    F: Fn(Fixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(Fixture::default()).await;
    for thread in ["a", "b", "c"] {
        s.save_checkpoint(thread, serde_json::json!({}))
            .await
            .map_err(|e| e.to_string())?;
    }
    // Saving "a" again moves it to the front.
    s.save_checkpoint("a", serde_json::json!({"again": true}))
        .await
        .map_err(|e| e.to_string())?;

    let listed = s.list_checkpoints().await.map_err(|e| e.to_string())?;
    if listed != ["a", "c", "b"] {
        return Err(format!("expected [a, c, b], got {listed:?}"));
    }
    Ok(())
}
