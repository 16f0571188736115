//! Bounded access to a shared ledger backend.
//!
//! `PooledLedger` wraps any [`Ledger`] and caps how many calls may be in
//! flight at once. Callers beyond `max_connections` queue on a semaphore;
//! callers beyond `max_waiters`, or callers that wait longer than
//! `acquire_timeout`, get [`StorageError::PoolExhausted`] immediately.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::StorageError;
use crate::record::{
    AuditSummary, CheckpointRecord, ExpenditureRecord, FlagRecord, NewFlag, PriceStats, Vendor,
};
use crate::traits::{CheckpointStore, Ledger};

/// Pool sizing.
///
/// Permits are not connections, so there is no minimum to keep open: an idle
/// pool holds nothing, and the wrapped backend owns any connections it has.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub max_waiters: usize,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_waiters: 64,
            acquire_timeout_ms: 5_000,
        }
    }
}

pub struct PooledLedger<L> {
    inner: Arc<L>,
    permits: Semaphore,
    waiting: AtomicUsize,
    max_waiters: usize,
    acquire_timeout: Duration,
}

/// Decrements the waiter count when the acquire attempt ends, however it ends.
struct WaitGuard<'a>(&'a AtomicUsize);

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<L: Ledger> PooledLedger<L> {
    pub fn new(inner: Arc<L>, config: &PoolConfig) -> Self {
        Self {
            inner,
            permits: Semaphore::new(config.max_connections),
            waiting: AtomicUsize::new(0),
            max_waiters: config.max_waiters,
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
        }
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &Arc<L> {
        &self.inner
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    async fn acquire(&self) -> Result<SemaphorePermit<'_>, StorageError> {
        if let Ok(permit) = self.permits.try_acquire() {
            return Ok(permit);
        }

        let queued = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _guard = WaitGuard(&self.waiting);
        if queued >= self.max_waiters {
            tracing::warn!(queued, max_waiters = self.max_waiters, "ledger wait queue full");
            return Err(StorageError::PoolExhausted {
                reason: format!("wait queue full ({} waiters)", self.max_waiters),
            });
        }

        match tokio::time::timeout(self.acquire_timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(StorageError::PoolExhausted {
                reason: "pool closed".to_string(),
            }),
            Err(_elapsed) => Err(StorageError::PoolExhausted {
                reason: format!(
                    "timed out after {} ms waiting for a connection",
                    self.acquire_timeout.as_millis()
                ),
            }),
        }
    }
}

#[async_trait]
impl<L: Ledger> Ledger for PooledLedger<L> {
    async fn find_vendor_by_id(&self, vendor_id: &str) -> Result<Option<Vendor>, StorageError> {
        let _permit = self.acquire().await?;
        self.inner.find_vendor_by_id(vendor_id).await
    }

    async fn find_vendors_by_name(&self, fragment: &str) -> Result<Vec<Vendor>, StorageError> {
        let _permit = self.acquire().await?;
        self.inner.find_vendors_by_name(fragment).await
    }

    async fn historical_price_stats(
        &self,
        item_description: &str,
        lookback_months: u32,
        as_of: &str,
    ) -> Result<Option<PriceStats>, StorageError> {
        let _permit = self.acquire().await?;
        self.inner
            .historical_price_stats(item_description, lookback_months, as_of)
            .await
    }

    async fn recent_transactions(
        &self,
        vendor_id: &str,
        limit: usize,
    ) -> Result<Vec<ExpenditureRecord>, StorageError> {
        let _permit = self.acquire().await?;
        self.inner.recent_transactions(vendor_id, limit).await
    }

    async fn reference_number_exists(
        &self,
        reference_number: &str,
    ) -> Result<Option<ExpenditureRecord>, StorageError> {
        let _permit = self.acquire().await?;
        self.inner.reference_number_exists(reference_number).await
    }

    async fn insert_expenditure(&self, record: ExpenditureRecord) -> Result<(), StorageError> {
        let _permit = self.acquire().await?;
        self.inner.insert_expenditure(record).await
    }

    async fn persist_flags(
        &self,
        thread_id: &str,
        vendor_id: Option<&str>,
        reference_number: Option<&str>,
        flags: &[NewFlag],
        fraud_risk_score: Decimal,
    ) -> Result<(), StorageError> {
        let _permit = self.acquire().await?;
        self.inner
            .persist_flags(thread_id, vendor_id, reference_number, flags, fraud_risk_score)
            .await
    }

    async fn flags_for_thread(&self, thread_id: &str) -> Result<Vec<FlagRecord>, StorageError> {
        let _permit = self.acquire().await?;
        self.inner.flags_for_thread(thread_id).await
    }

    async fn list_audits(&self, limit: usize) -> Result<Vec<AuditSummary>, StorageError> {
        let _permit = self.acquire().await?;
        self.inner.list_audits(limit).await
    }

    async fn review_flag(
        &self,
        flag_id: u64,
        notes: Option<&str>,
    ) -> Result<FlagRecord, StorageError> {
        let _permit = self.acquire().await?;
        self.inner.review_flag(flag_id, notes).await
    }
}

#[async_trait]
impl<L: Ledger + CheckpointStore> CheckpointStore for PooledLedger<L> {
    async fn save_checkpoint(
        &self,
        thread_id: &str,
        state: serde_json::Value,
    ) -> Result<(), StorageError> {
        let _permit = self.acquire().await?;
        self.inner.save_checkpoint(thread_id, state).await
    }

    async fn load_checkpoint(
        &self,
        thread_id: &str,
    ) -> Result<Option<CheckpointRecord>, StorageError> {
        let _permit = self.acquire().await?;
        self.inner.load_checkpoint(thread_id).await
    }

    async fn list_checkpoints(&self) -> Result<Vec<String>, StorageError> {
        let _permit = self.acquire().await?;
        self.inner.list_checkpoints().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLedger;

    fn pool(max_connections: usize, max_waiters: usize, timeout_ms: u64) -> PooledLedger<MemoryLedger> {
        PooledLedger::new(
            Arc::new(MemoryLedger::new()),
            &PoolConfig {
                max_connections,
                max_waiters,
                acquire_timeout_ms: timeout_ms,
            },
        )
    }

    #[tokio::test]
    async fn permits_are_released_after_each_call() {
        let pool = pool(2, 4, 100);
        for _ in 0..10 {
            pool.find_vendor_by_id("VND001").await.unwrap();
        }
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn acquire_times_out_when_all_permits_are_held() {
        let pool = pool(1, 4, 20);
        let _held = pool.acquire().await.unwrap();
        match pool.find_vendor_by_id("VND001").await {
            Err(StorageError::PoolExhausted { reason }) => assert!(reason.contains("timed out")),
            other => panic!("expected PoolExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_wait_queue_fails_fast() {
        let pool = pool(1, 0, 5_000);
        let _held = pool.acquire().await.unwrap();
        match pool.list_audits(0).await {
            Err(StorageError::PoolExhausted { reason }) => assert!(reason.contains("wait queue")),
            other => panic!("expected PoolExhausted, got {other:?}"),
        }
        assert_eq!(pool.waiting.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn queued_caller_proceeds_once_a_permit_frees() {
        let pool = Arc::new(pool(1, 4, 1_000));
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.list_audits(0).await.map(|rows| rows.len()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), 0);
    }
}
