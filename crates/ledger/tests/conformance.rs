use std::sync::Arc;

use spendshield_ledger::conformance::{run_conformance_suite, Fixture};
use spendshield_ledger::{LedgerSnapshot, MemoryLedger, PoolConfig, PooledLedger};

fn load(fixture: Fixture) -> MemoryLedger {
    MemoryLedger::from_snapshot(LedgerSnapshot {
        vendors: fixture.vendors,
        expenditures: fixture.expenditures,
        ..LedgerSnapshot::default()
    })
    .expect("fixture is valid")
}

#[tokio::test]
async fn memory_ledger_conformance() {
    let report = run_conformance_suite(|fixture| async move { load(fixture) }).await;
    assert!(report.total > 0);
    assert!(report.failed == 0, "{report}");
}

#[tokio::test]
async fn pooled_memory_ledger_conformance() {
    let config = PoolConfig {
        max_connections: 2,
        max_waiters: 64,
        acquire_timeout_ms: 5_000,
    };
    let report = run_conformance_suite(|fixture| {
        let config = config.clone();
        async move { PooledLedger::new(Arc::new(load(fixture)), &config) }
    })
    .await;
    assert!(report.failed == 0, "{report}");
}
