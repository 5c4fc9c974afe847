use tally_types::RelationStatus;

/// Errors from ledger store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A row referenced by id does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A uniqueness constraint rejected an insert.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A relationship status change that is not pending → decided.
    #[error("invalid relationship transition: {from} -> {to}")]
    InvalidTransition {
        from: RelationStatus,
        to: RelationStatus,
    },

    /// A stored row could not be decoded.
    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    /// Failure reported by the database driver.
    #[error("database error: {0}")]
    Backend(#[from] sqlx::Error),

    /// An identifier does not fit the backend's integer type.
    #[error("identifier out of range: {0}")]
    OutOfRange(u64),

    /// An aggregate exceeded the decimal range.
    #[error("arithmetic overflow: {0}")]
    Overflow(String),

    /// The store configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn corrupt(table: &'static str, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            table,
            reason: reason.into(),
        }
    }

    /// `true` for uniqueness conflicts the caller may recover from by
    /// re-reading.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
