/// All errors that can be returned by a `Ledger` or `CheckpointStore` implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A record addressed by key does not exist (flag id, vendor id, ...).
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// A record with the same primary key already exists.
    #[error("{kind} already exists: {key}")]
    AlreadyExists { kind: &'static str, key: String },

    /// Unique constraint on expenditure reference numbers. Raised at insert
    /// time, so two concurrent writers of the same reference cannot both win.
    #[error("duplicate reference number: {reference_number}")]
    DuplicateReference { reference_number: String },

    /// A vendor name fragment matched several vendors and none of them
    /// matched exactly.
    #[error("vendor name '{fragment}' is ambiguous: matches {}", candidates.join(", "))]
    AmbiguousVendor {
        fragment: String,
        candidates: Vec<String>,
    },

    /// The bounded connection pool could not hand out a connection, either
    /// because the wait queue is full or because the acquire timed out.
    #[error("ledger connection pool exhausted: {reason}")]
    PoolExhausted { reason: String },

    /// A backend-specific storage error (I/O, serialization, corrupt row, etc.).
    #[error("ledger backend error: {0}")]
    Backend(String),
}
