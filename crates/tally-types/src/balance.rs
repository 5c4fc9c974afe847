use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::id::{BalanceId, StudioId, UserId};
use crate::kind::{BalanceColumn, BalanceType};
use crate::relation::Studio;

/// The uniqueness key of a balance: one row per
/// (player, provider, studio, type).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BalanceKey {
    pub player_id: UserId,
    pub provider_id: UserId,
    pub studio_id: StudioId,
    #[serde(rename = "type")]
    pub balance_type: BalanceType,
}

impl BalanceKey {
    pub fn new(
        player_id: UserId,
        provider_id: UserId,
        studio_id: StudioId,
        balance_type: BalanceType,
    ) -> Self {
        Self {
            player_id,
            provider_id,
            studio_id,
            balance_type,
        }
    }
}

/// Stored value one player holds with one provider, optionally under a
/// studio, in one unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub id: BalanceId,
    pub player_id: UserId,
    pub provider_id: UserId,
    pub studio_id: StudioId,
    #[serde(rename = "type")]
    pub balance_type: BalanceType,
    pub amount: Decimal,
    pub frozen_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// A zeroed balance for `key`, as created on first recharge.
    pub fn opened(id: BalanceId, key: BalanceKey, at: DateTime<Utc>) -> Self {
        Self {
            id,
            player_id: key.player_id,
            provider_id: key.provider_id,
            studio_id: key.studio_id,
            balance_type: key.balance_type,
            amount: Decimal::ZERO,
            frozen_amount: Decimal::ZERO,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(
            self.player_id,
            self.provider_id,
            self.studio_id,
            self.balance_type,
        )
    }

    /// Spendable value: the amount not held back by a freeze.
    pub fn available(&self) -> Decimal {
        self.amount - self.frozen_amount
    }

    /// Current value of one column.
    pub fn column(&self, column: BalanceColumn) -> Decimal {
        match column {
            BalanceColumn::Amount => self.amount,
            BalanceColumn::Frozen => self.frozen_amount,
        }
    }
}

/// A balance with its studio resolved for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceView {
    #[serde(flatten)]
    pub balance: Balance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub studio: Option<Studio>,
}

/// Per-type aggregate of a provider's balances.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSummary {
    #[serde(rename = "type")]
    pub balance_type: BalanceType,
    pub total_amount: Decimal,
    /// Number of distinct players holding this type with the provider.
    pub player_count: u64,
}
