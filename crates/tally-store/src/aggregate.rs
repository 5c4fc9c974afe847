use std::collections::{BTreeMap, HashSet};

use rust_decimal::Decimal;
use tally_types::{Balance, BalanceType, TypeSummary, UserId};

use crate::error::{StoreError, StoreResult};

/// Fold balances into per-type totals, ordered money, time, point.
pub(crate) fn summarize<'a>(
    balances: impl IntoIterator<Item = &'a Balance>,
) -> StoreResult<Vec<TypeSummary>> {
    let mut totals: BTreeMap<BalanceType, (Decimal, HashSet<UserId>)> = BTreeMap::new();
    for balance in balances {
        let entry = totals.entry(balance.balance_type).or_default();
        entry.0 = entry.0.checked_add(balance.amount).ok_or_else(|| {
            StoreError::Overflow(format!(
                "{} total of provider {} exceeds the decimal range",
                balance.balance_type, balance.provider_id
            ))
        })?;
        entry.1.insert(balance.player_id);
    }
    Ok(totals
        .into_iter()
        .map(|(balance_type, (total_amount, players))| TypeSummary {
            balance_type,
            total_amount,
            player_count: players.len() as u64,
        })
        .collect())
}
