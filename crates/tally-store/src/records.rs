//! Write-side records accepted by [`LedgerTx`](crate::LedgerTx).
//!
//! Each mutation has its own struct naming exactly the fields it may set.
//! Identifiers and timestamps are assigned by the store.

use rust_decimal::Decimal;
use tally_types::{
    BalanceColumn, BalanceId, RelationStatus, StudioId, TransactionKind, UserId,
};

/// New value for one column of a balance row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalanceUpdate {
    Amount(Decimal),
    Frozen(Decimal),
}

impl BalanceUpdate {
    pub fn for_column(column: BalanceColumn, value: Decimal) -> Self {
        match column {
            BalanceColumn::Amount => Self::Amount(value),
            BalanceColumn::Frozen => Self::Frozen(value),
        }
    }
}

/// A transaction log entry to append.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTransaction {
    pub balance_id: BalanceId,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub before_amount: Decimal,
    pub after_amount: Decimal,
    pub description: String,
    pub operator_id: UserId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewStudio {
    pub owner_id: UserId,
    pub name: String,
}

/// A provider's pending application to a studio.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewRelationship {
    pub provider_id: UserId,
    pub studio_id: StudioId,
    pub notes: String,
}

/// The studio owner's decision on a pending application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationDecision {
    pub status: RelationStatus,
    pub notes: String,
}
