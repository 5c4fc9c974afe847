//! Foundation types for the Tally balance ledger.
//!
//! This crate provides the identifiers, enumerations, and entity records used
//! throughout Tally. Every other Tally crate depends on `tally-types`.
//!
//! # Key Types
//!
//! - [`UserId`], [`StudioId`], [`BalanceId`], [`TransactionId`], [`RelationId`]:
//!   integer identifiers
//! - [`Actor`] / [`Role`]: who is acting, and in which capacity
//! - [`BalanceKey`]: the (player, provider, studio, type) tuple
//! - [`Balance`] / [`BalanceView`]: stored value and its display form
//! - [`Transaction`] / [`TransactionKind`]: immutable audit entries
//! - [`Relationship`] / [`RelationStatus`]: provider↔studio affiliation
//! - [`PageRequest`] / [`Page`]: bounded pagination

pub mod actor;
pub mod balance;
pub mod error;
pub mod id;
pub mod kind;
pub mod page;
pub mod relation;
pub mod transaction;

pub use actor::{Actor, Role};
pub use balance::{Balance, BalanceKey, BalanceView, TypeSummary};
pub use error::TypeError;
pub use id::{BalanceId, RelationId, StudioId, TransactionId, UserId};
pub use kind::{BalanceColumn, BalanceType, TransactionKind};
pub use page::{Page, PageRequest};
pub use relation::{RelationStatus, Relationship, Studio};
pub use transaction::Transaction;

/// Re-exported so downstream crates agree on the amount type.
pub use rust_decimal::Decimal;
