use rust_decimal::Decimal;
use serde::Serialize;
use tally_types::{Balance, BalanceColumn, BalanceId, Transaction, TransactionId};

/// Result of replaying one balance's transaction chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub balance_id: BalanceId,
    pub transaction_count: u64,
    /// Running `amount` after the last entry.
    pub replayed_amount: Decimal,
    /// Running `frozen_amount` after the last entry.
    pub replayed_frozen: Decimal,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    /// Returns `true` if the chain reconstructs the stored balance exactly.
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

/// A specific inconsistency found during replay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// The offending entry; `None` for end-of-chain checks.
    pub transaction_id: Option<TransactionId>,
    pub kind: ViolationKind,
    pub description: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// `before` differs from the running value of its column.
    BeforeMismatch,
    /// `after != before + amount`.
    ArithmeticMismatch,
    FinalAmountMismatch,
    FinalFrozenMismatch,
}

/// Replays transaction chains against stored balances.
pub struct BalanceAuditor;

impl BalanceAuditor {
    /// Replay `chain` (oldest first) from zero and compare with `balance`.
    ///
    /// After a mismatched entry the replay continues from that entry's
    /// recorded `after`, so one bad entry is reported once.
    pub fn replay(balance: &Balance, chain: &[Transaction]) -> AuditReport {
        let mut amount = Decimal::ZERO;
        let mut frozen = Decimal::ZERO;
        let mut violations = Vec::new();

        for entry in chain {
            let running = match entry.kind.column() {
                BalanceColumn::Amount => &mut amount,
                BalanceColumn::Frozen => &mut frozen,
            };

            if entry.before_amount != *running {
                violations.push(Violation {
                    transaction_id: Some(entry.id),
                    kind: ViolationKind::BeforeMismatch,
                    description: format!(
                        "{} entry starts at {}, running value is {}",
                        entry.kind, entry.before_amount, running
                    ),
                });
            }
            if !entry.is_balanced() {
                violations.push(Violation {
                    transaction_id: Some(entry.id),
                    kind: ViolationKind::ArithmeticMismatch,
                    description: format!(
                        "{} + {} != {}",
                        entry.before_amount, entry.amount, entry.after_amount
                    ),
                });
            }
            *running = entry.after_amount;
        }

        if amount != balance.amount {
            violations.push(Violation {
                transaction_id: None,
                kind: ViolationKind::FinalAmountMismatch,
                description: format!("replayed amount {amount}, stored {}", balance.amount),
            });
        }
        if frozen != balance.frozen_amount {
            violations.push(Violation {
                transaction_id: None,
                kind: ViolationKind::FinalFrozenMismatch,
                description: format!(
                    "replayed frozen amount {frozen}, stored {}",
                    balance.frozen_amount
                ),
            });
        }

        AuditReport {
            balance_id: balance.id,
            transaction_count: chain.len() as u64,
            replayed_amount: amount,
            replayed_frozen: frozen,
            violations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tally_types::{BalanceKey, BalanceType, StudioId, TransactionKind, UserId};

    fn balance(amount: Decimal, frozen: Decimal) -> Balance {
        let key = BalanceKey::new(UserId(7), UserId(3), StudioId::INDEPENDENT, BalanceType::Money);
        let mut balance = Balance::opened(BalanceId(1), key, Utc::now());
        balance.amount = amount;
        balance.frozen_amount = frozen;
        balance
    }

    fn entry(id: u64, kind: TransactionKind, before: Decimal, amount: Decimal, after: Decimal) -> Transaction {
        Transaction {
            id: TransactionId(id),
            balance_id: BalanceId(1),
            kind,
            amount,
            before_amount: before,
            after_amount: after,
            description: String::new(),
            operator_id: UserId(3),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn clean_chain_is_consistent() {
        let chain = vec![
            entry(1, TransactionKind::Recharge, dec!(0), dec!(100), dec!(100)),
            entry(2, TransactionKind::Freeze, dec!(0), dec!(30), dec!(30)),
            entry(3, TransactionKind::Consume, dec!(100), dec!(-20), dec!(80)),
            entry(4, TransactionKind::Unfreeze, dec!(30), dec!(-10), dec!(20)),
        ];
        let report = BalanceAuditor::replay(&balance(dec!(80), dec!(20)), &chain);
        assert!(report.is_consistent(), "{:?}", report.violations);
        assert_eq!(report.transaction_count, 4);
        assert_eq!(report.replayed_amount, dec!(80));
        assert_eq!(report.replayed_frozen, dec!(20));
    }

    #[test]
    fn empty_chain_matches_zero_balance() {
        let report = BalanceAuditor::replay(&balance(dec!(0), dec!(0)), &[]);
        assert!(report.is_consistent());
    }

    #[test]
    fn broken_link_is_reported_once() {
        let chain = vec![
            entry(1, TransactionKind::Recharge, dec!(0), dec!(100), dec!(100)),
            entry(2, TransactionKind::Recharge, dec!(90), dec!(10), dec!(100)),
            entry(3, TransactionKind::Recharge, dec!(100), dec!(5), dec!(105)),
        ];
        let report = BalanceAuditor::replay(&balance(dec!(105), dec!(0)), &chain);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].kind, ViolationKind::BeforeMismatch);
        assert_eq!(report.violations[0].transaction_id, Some(TransactionId(2)));
    }

    #[test]
    fn bad_arithmetic_and_drift_are_reported() {
        let chain = vec![entry(1, TransactionKind::Recharge, dec!(0), dec!(100), dec!(99))];
        let report = BalanceAuditor::replay(&balance(dec!(100), dec!(1)), &chain);
        let kinds: Vec<_> = report.violations.iter().map(|v| v.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ViolationKind::ArithmeticMismatch,
                ViolationKind::FinalAmountMismatch,
                ViolationKind::FinalFrozenMismatch,
            ]
        );
    }
}
