use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Unit in which a balance is held.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceType {
    /// Currency.
    Money,
    /// Prepaid service time, in minutes.
    Time,
    /// Loyalty or bundle points.
    Point,
}

impl BalanceType {
    /// All balance types in display order.
    pub const ALL: [BalanceType; 3] = [Self::Money, Self::Time, Self::Point];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Money => "money",
            Self::Time => "time",
            Self::Point => "point",
        }
    }
}

impl fmt::Display for BalanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BalanceType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "money" => Ok(Self::Money),
            "time" => Ok(Self::Time),
            "point" => Ok(Self::Point),
            other => Err(TypeError::unknown("balance type", other)),
        }
    }
}

/// Which column of a balance a movement affects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BalanceColumn {
    Amount,
    Frozen,
}

/// Kind of balance movement recorded in the transaction log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Value added by a provider or studio.
    Recharge,
    /// Value spent on a service.
    Consume,
    /// Value returned to the player.
    Refund,
    /// Value reserved and no longer spendable.
    Freeze,
    /// Reserved value released back to the spendable pool.
    Unfreeze,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recharge => "recharge",
            Self::Consume => "consume",
            Self::Refund => "refund",
            Self::Freeze => "freeze",
            Self::Unfreeze => "unfreeze",
        }
    }

    /// The balance column this kind of movement changes.
    pub fn column(&self) -> BalanceColumn {
        match self {
            Self::Recharge | Self::Consume | Self::Refund => BalanceColumn::Amount,
            Self::Freeze | Self::Unfreeze => BalanceColumn::Frozen,
        }
    }

    /// `true` if the movement adds to its column, `false` if it subtracts.
    pub fn is_increase(&self) -> bool {
        matches!(self, Self::Recharge | Self::Refund | Self::Freeze)
    }

    /// Only a recharge may create the balance row it targets.
    pub fn creates_balance(&self) -> bool {
        matches!(self, Self::Recharge)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recharge" => Ok(Self::Recharge),
            "consume" => Ok(Self::Consume),
            "refund" => Ok(Self::Refund),
            "freeze" => Ok(Self::Freeze),
            "unfreeze" => Ok(Self::Unfreeze),
            other => Err(TypeError::unknown("transaction kind", other)),
        }
    }
}
