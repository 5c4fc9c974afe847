//! Core ledger logic for Tally.
//!
//! [`LedgerService`] is the only writer of balances and the transaction log.
//! Every movement (recharge, consume, refund, freeze, unfreeze) is
//! authorized by the [`tally_gate`] pipeline and applied in a single store
//! transaction together with its log entry. The service also serves the
//! ownership-filtered read paths, the provider/studio relationship
//! directory, and [`audit`] replay of a balance's log.

pub mod audit;
pub mod config;
pub mod error;
pub mod service;

pub use audit::{AuditReport, BalanceAuditor, Violation, ViolationKind};
pub use config::LedgerConfig;
pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use service::{LedgerService, Movement};
