//! Storage backends for the Tally ledger.
//!
//! All persistence goes through two traits:
//!
//! - [`LedgerStore`]: opens transactions and serves the read-only queries
//!   (balance listings, transaction history, provider summaries, studio
//!   applications).
//! - [`LedgerTx`]: one serialized read-write transaction. Mutations are only
//!   visible after [`LedgerTx::commit`]; dropping the transaction rolls back.
//!
//! # Backends
//!
//! - [`InMemoryLedgerStore`]: process-local, for tests and embedding.
//! - [`SqliteLedgerStore`]: durable SQLite database via `sqlx`.

mod aggregate;
pub mod config;
pub mod error;
pub mod memory;
pub mod records;
pub mod sqlite;
pub mod traits;

pub use config::DatabaseConfig;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryLedgerStore;
pub use records::{BalanceUpdate, NewRelationship, NewStudio, NewTransaction, RelationDecision};
pub use sqlite::SqliteLedgerStore;
pub use traits::{LedgerStore, LedgerTx};
