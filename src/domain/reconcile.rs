use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::{
    Currency, EscrowId, EscrowStatus, EscrowTransaction, LedgerTransaction, MinorUnits,
    TransactionType, WalletAccount, WalletId,
};

/// Sum of many `MinorUnits` values; wide enough that totals never overflow.
pub type TotalUnits = i128;

/// Money per currency that entered, left, or sits inside the system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyTotals {
    pub wallet_total: TotalUnits,
    pub held_in_escrow: TotalUnits,
    pub deposited: TotalUnits,
    pub withdrawn: TotalUnits,
}

impl CurrencyTotals {
    /// Deposits minus withdrawals must equal what wallets and holds contain.
    pub fn is_balanced(&self) -> bool {
        self.wallet_total + self.held_in_escrow == self.deposited - self.withdrawn
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconciliationIssue {
    TotalsMismatch {
        currency: Currency,
        expected: TotalUnits,
        actual: TotalUnits,
    },
    AuditMismatch {
        wallet: WalletId,
        balance: MinorUnits,
        audited: MinorUnits,
    },
    NegativeBalance {
        wallet: WalletId,
        balance: MinorUnits,
    },
    SplitLeak {
        escrow: EscrowId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub wallet_count: usize,
    pub transaction_count: usize,
    pub escrow_count: usize,
    pub totals: BTreeMap<String, CurrencyTotals>,
    pub issues: Vec<ReconciliationIssue>,
}

impl ReconciliationReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Cross-check balances against completed transactions, escrow holds and
/// the audit trail. `audited` maps each wallet to the sum of its audited deltas.
pub fn build_reconciliation_report(
    wallets: &[WalletAccount],
    transactions: &[LedgerTransaction],
    escrows: &[EscrowTransaction],
    audited: &HashMap<WalletId, MinorUnits>,
) -> ReconciliationReport {
    let mut totals: BTreeMap<String, CurrencyTotals> = BTreeMap::new();
    let mut issues = Vec::new();

    for wallet in wallets {
        totals
            .entry(wallet.currency.to_string())
            .or_default()
            .wallet_total += TotalUnits::from(wallet.balance);

        if wallet.balance < 0 {
            issues.push(ReconciliationIssue::NegativeBalance {
                wallet: wallet.id,
                balance: wallet.balance,
            });
        }

        let audited_balance = audited.get(&wallet.id).copied().unwrap_or(0);
        if audited_balance != wallet.balance {
            issues.push(ReconciliationIssue::AuditMismatch {
                wallet: wallet.id,
                balance: wallet.balance,
                audited: audited_balance,
            });
        }
    }

    for tx in transactions.iter().filter(|tx| tx.is_completed()) {
        let entry = totals.entry(tx.currency.to_string()).or_default();
        match tx.tx_type {
            TransactionType::Deposit => entry.deposited += TotalUnits::from(tx.amount),
            TransactionType::Withdraw => entry.withdrawn += TotalUnits::from(tx.amount),
            TransactionType::Transfer => {}
        }
    }

    for escrow in escrows {
        if escrow.status.holds_funds() {
            totals
                .entry(escrow.currency.to_string())
                .or_default()
                .held_in_escrow += TotalUnits::from(escrow.amount);
        }
        if escrow.status == EscrowStatus::Released {
            let leaks = match escrow.split() {
                Some(split) => {
                    split.net_amount.checked_add(split.commission_amount) != Some(escrow.amount)
                }
                None => true,
            };
            if leaks {
                issues.push(ReconciliationIssue::SplitLeak { escrow: escrow.id });
            }
        }
    }

    for (code, total) in &totals {
        if !total.is_balanced() {
            if let Ok(currency) = Currency::new(code) {
                issues.push(ReconciliationIssue::TotalsMismatch {
                    currency,
                    expected: total.deposited - total.withdrawn,
                    actual: total.wallet_total + total.held_in_escrow,
                });
            }
        }
    }

    ReconciliationReport {
        wallet_count: wallets.len(),
        transaction_count: transactions.len(),
        escrow_count: escrows.len(),
        totals,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::domain::{CommissionRate, TransactionStatus};

    fn gnf() -> Currency {
        Currency::new("GNF").unwrap()
    }

    fn wallet(balance: MinorUnits) -> WalletAccount {
        let mut w = WalletAccount::new(Uuid::new_v4().to_string(), gnf());
        w.balance = balance;
        w
    }

    fn completed(mut tx: LedgerTransaction) -> LedgerTransaction {
        tx.status = TransactionStatus::Completed;
        tx
    }

    #[test]
    fn test_balanced_ledger_is_healthy() {
        let a = wallet(7000);
        let b = wallet(3000);
        let transactions = vec![
            completed(LedgerTransaction::deposit(a.id, 10000, gnf(), "D1")),
            completed(LedgerTransaction::transfer(a.id, b.id, 3000, gnf(), "T1")),
        ];
        let audited = HashMap::from([(a.id, 7000), (b.id, 3000)]);

        let report = build_reconciliation_report(&[a, b], &transactions, &[], &audited);

        assert!(report.is_healthy(), "{:?}", report.issues);
        assert_eq!(report.totals["GNF"].deposited, 10000);
        assert_eq!(report.totals["GNF"].wallet_total, 10000);
    }

    #[test]
    fn test_held_escrow_counts_towards_totals() {
        let payer = wallet(6000);
        let payee = wallet(0);
        let mut escrow = EscrowTransaction::new(
            "O1",
            "p",
            "q",
            payer.id,
            payee.id,
            4000,
            gnf(),
            CommissionRate::ZERO,
        );
        escrow.status = EscrowStatus::Held;
        let transactions = vec![completed(LedgerTransaction::deposit(
            payer.id,
            10000,
            gnf(),
            "D1",
        ))];
        let audited = HashMap::from([(payer.id, 6000)]);

        let report =
            build_reconciliation_report(&[payer, payee], &transactions, &[escrow], &audited);

        assert!(report.is_healthy(), "{:?}", report.issues);
        assert_eq!(report.totals["GNF"].held_in_escrow, 4000);
    }

    #[test]
    fn test_detects_untracked_balance_change() {
        let a = wallet(15000);
        let transactions = vec![completed(LedgerTransaction::deposit(
            a.id, 10000, gnf(), "D1",
        ))];
        let audited = HashMap::from([(a.id, 10000)]);

        let report = build_reconciliation_report(&[a], &transactions, &[], &audited);

        assert!(!report.is_healthy());
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, ReconciliationIssue::TotalsMismatch { .. })));
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, ReconciliationIssue::AuditMismatch { .. })));
    }

    #[test]
    fn test_totals_beyond_a_single_balance() {
        let a = wallet(MinorUnits::MAX);
        let b = wallet(MinorUnits::MAX);
        let transactions = vec![
            completed(LedgerTransaction::deposit(a.id, MinorUnits::MAX, gnf(), "D1")),
            completed(LedgerTransaction::deposit(b.id, MinorUnits::MAX, gnf(), "D2")),
        ];
        let audited = HashMap::from([(a.id, MinorUnits::MAX), (b.id, MinorUnits::MAX)]);

        let report = build_reconciliation_report(&[a, b], &transactions, &[], &audited);

        assert!(report.is_healthy(), "{:?}", report.issues);
        assert_eq!(
            report.totals["GNF"].wallet_total,
            2 * TotalUnits::from(MinorUnits::MAX)
        );
    }

    #[test]
    fn test_ignores_failed_transactions() {
        let a = wallet(0);
        let failed = LedgerTransaction::deposit(a.id, 500, gnf(), "D1");

        let report = build_reconciliation_report(&[a], &[failed], &[], &HashMap::new());

        assert!(report.is_healthy());
    }
}
