use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::id::{BalanceId, TransactionId, UserId};
use crate::kind::TransactionKind;

/// Immutable record of one balance movement.
///
/// `amount` is signed: a consume of 10 is stored as `-10`. For freeze and
/// unfreeze the snapshots track the frozen column rather than the amount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub balance_id: BalanceId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub before_amount: Decimal,
    pub after_amount: Decimal,
    pub description: String,
    pub operator_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// `after == before + amount`.
    pub fn is_balanced(&self) -> bool {
        self.before_amount.checked_add(self.amount) == Some(self.after_amount)
    }
}
