pub mod conformance;
pub mod date;
mod error;
mod memory;
mod pool;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{LedgerSnapshot, MemoryLedger};
pub use pool::{PoolConfig, PooledLedger};
pub use record::{
    AuditSummary, CheckpointRecord, ExpenditureRecord, FlagRecord, NewFlag, PriceStats, Vendor,
};
pub use traits::{resolve_vendor_name, CheckpointStore, Ledger};
