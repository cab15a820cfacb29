//! Per-player wallet ledger
//!
//! Balances change only through `debit` and `credit`, each producing one
//! `WalletTransaction`. Operations on the same player are serialized by
//! that player's account lock; different players never contend.

use crate::crash::types::{BetId, PlayerId, RoundId};
use crate::errors::LedgerError;
use crate::money::Amount;
use crate::wallet::journal::{JournalRecord, LedgerJournal, NullJournal};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    StakeDebit,
    PayoutCredit,
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: u64,
    pub player: PlayerId,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub balance_before: Amount,
    pub balance_after: Amount,
    pub bet_id: BetId,
    pub round_id: RoundId,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// What a debit or credit is for
#[derive(Debug, Clone)]
pub struct TransactionContext {
    pub bet_id: BetId,
    pub round_id: RoundId,
    pub description: String,
}

#[derive(Debug)]
struct Account {
    opening_balance: Amount,
    balance: Amount,
    transactions: Vec<WalletTransaction>,
}

impl Account {
    fn opened(opening_balance: Amount) -> Self {
        Self {
            opening_balance,
            balance: opening_balance,
            transactions: Vec::new(),
        }
    }

    /// Opening balance plus credits minus debits
    fn replayed_balance(&self) -> Option<Amount> {
        self.transactions
            .iter()
            .try_fold(self.opening_balance, |running, tx| match tx.kind {
                TransactionKind::StakeDebit => running.checked_sub(tx.amount),
                TransactionKind::PayoutCredit => running.checked_add(tx.amount),
            })
    }
}

pub struct WalletLedger {
    accounts: DashMap<PlayerId, Arc<Mutex<Account>>>,
    next_transaction_id: AtomicU64,
    journal: Arc<dyn LedgerJournal>,
}

impl WalletLedger {
    pub fn new(journal: Arc<dyn LedgerJournal>) -> Self {
        Self {
            accounts: DashMap::new(),
            next_transaction_id: AtomicU64::new(1),
            journal,
        }
    }

    /// Ledger with no durable journal
    pub fn in_memory() -> Self {
        Self::new(Arc::new(NullJournal))
    }

    /// Rebuild state from journal records, checking every balance link.
    ///
    /// New records go to `journal`; the replayed ones are not re-appended.
    pub fn restore(records: Vec<JournalRecord>, journal: Arc<dyn LedgerJournal>) -> Result<Self, LedgerError> {
        let ledger = Self::new(journal);
        let mut max_id = 0;

        for record in records {
            match record {
                JournalRecord::AccountOpened { player, opening_balance, .. } => {
                    if ledger.accounts.contains_key(&player) {
                        return Err(LedgerError::AccountExists(player));
                    }
                    ledger
                        .accounts
                        .insert(player, Arc::new(Mutex::new(Account::opened(opening_balance))));
                }
                JournalRecord::Transaction(tx) => {
                    let account = ledger.account(&tx.player)?;
                    let mut account = account.lock();
                    if tx.balance_before != account.balance {
                        return Err(LedgerError::ReplayMismatch {
                            player: tx.player.clone(),
                            transaction_id: tx.id,
                            expected: account.balance,
                            found: tx.balance_before,
                        });
                    }
                    let after = match tx.kind {
                        TransactionKind::StakeDebit => account.balance.checked_sub(tx.amount),
                        TransactionKind::PayoutCredit => account.balance.checked_add(tx.amount),
                    };
                    if after != Some(tx.balance_after) {
                        return Err(LedgerError::ReplayMismatch {
                            player: tx.player.clone(),
                            transaction_id: tx.id,
                            expected: after.unwrap_or(Amount::ZERO),
                            found: tx.balance_after,
                        });
                    }
                    max_id = max_id.max(tx.id);
                    account.balance = tx.balance_after;
                    account.transactions.push(tx);
                }
            }
        }

        ledger.next_transaction_id.store(max_id + 1, Ordering::SeqCst);
        tracing::info!(
            "💰 Restored {} wallets from journal (last transaction id {})",
            ledger.accounts.len(),
            max_id
        );
        Ok(ledger)
    }

    /// Open a wallet with an initial balance supplied by the deposit workflow
    pub fn open_account(&self, player: &PlayerId, opening_balance: Amount) -> Result<(), LedgerError> {
        use dashmap::mapref::entry::Entry;

        match self.accounts.entry(player.clone()) {
            Entry::Occupied(_) => Err(LedgerError::AccountExists(player.clone())),
            Entry::Vacant(slot) => {
                self.journal.append(&JournalRecord::AccountOpened {
                    player: player.clone(),
                    opening_balance,
                    at: Utc::now(),
                })?;
                slot.insert(Arc::new(Mutex::new(Account::opened(opening_balance))));
                tracing::debug!("Opened wallet for {} with {}", player, opening_balance);
                Ok(())
            }
        }
    }

    /// Open the wallet unless it already exists. Returns true if it was opened.
    pub fn ensure_account(&self, player: &PlayerId, opening_balance: Amount) -> Result<bool, LedgerError> {
        if self.accounts.contains_key(player) {
            return Ok(false);
        }
        match self.open_account(player, opening_balance) {
            Ok(()) => Ok(true),
            Err(LedgerError::AccountExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn balance(&self, player: &PlayerId) -> Result<Amount, LedgerError> {
        Ok(self.account(player)?.lock().balance)
    }

    pub fn transactions(&self, player: &PlayerId) -> Result<Vec<WalletTransaction>, LedgerError> {
        Ok(self.account(player)?.lock().transactions.clone())
    }

    /// Take `amount` from the player's balance; fails without effect if it would go negative
    pub fn debit(
        &self,
        player: &PlayerId,
        amount: Amount,
        context: TransactionContext,
    ) -> Result<WalletTransaction, LedgerError> {
        self.apply(player, TransactionKind::StakeDebit, amount, context)
    }

    pub fn credit(
        &self,
        player: &PlayerId,
        amount: Amount,
        context: TransactionContext,
    ) -> Result<WalletTransaction, LedgerError> {
        self.apply(player, TransactionKind::PayoutCredit, amount, context)
    }

    /// Check that replaying the player's transactions reproduces the balance
    pub fn verify_replay(&self, player: &PlayerId) -> Result<(), LedgerError> {
        let account = self.account(player)?;
        let account = account.lock();
        let replayed = account.replayed_balance().ok_or_else(|| LedgerError::Overflow(player.clone()))?;
        if replayed != account.balance {
            let last_id = account.transactions.last().map(|tx| tx.id).unwrap_or(0);
            return Err(LedgerError::ReplayMismatch {
                player: player.clone(),
                transaction_id: last_id,
                expected: replayed,
                found: account.balance,
            });
        }
        Ok(())
    }

    fn apply(
        &self,
        player: &PlayerId,
        kind: TransactionKind,
        amount: Amount,
        context: TransactionContext,
    ) -> Result<WalletTransaction, LedgerError> {
        let account = self.account(player)?;
        let mut account = account.lock();

        let balance_before = account.balance;
        let balance_after = match kind {
            TransactionKind::StakeDebit => balance_before.checked_sub(amount).ok_or_else(|| {
                LedgerError::InsufficientBalance {
                    player: player.clone(),
                    available: balance_before,
                    required: amount,
                }
            })?,
            TransactionKind::PayoutCredit => balance_before
                .checked_add(amount)
                .ok_or_else(|| LedgerError::Overflow(player.clone()))?,
        };

        let tx = WalletTransaction {
            id: self.next_transaction_id.fetch_add(1, Ordering::SeqCst),
            player: player.clone(),
            kind,
            amount,
            balance_before,
            balance_after,
            bet_id: context.bet_id,
            round_id: context.round_id,
            description: context.description,
            created_at: Utc::now(),
        };

        // Journal first: a record that cannot be queued leaves the balance untouched
        self.journal.append(&JournalRecord::Transaction(tx.clone()))?;

        account.balance = balance_after;
        account.transactions.push(tx.clone());
        Ok(tx)
    }

    /// Clone the account handle out of the map so the shard lock is not
    /// held while the account itself is locked.
    fn account(&self, player: &PlayerId) -> Result<Arc<Mutex<Account>>, LedgerError> {
        self.accounts
            .get(player)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| LedgerError::AccountNotFound(player.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::journal::MemoryJournal;

    fn context(description: &str) -> TransactionContext {
        TransactionContext {
            bet_id: BetId::new(),
            round_id: RoundId::new(1),
            description: description.to_string(),
        }
    }

    #[test]
    fn test_debit_and_credit_record_balances() {
        let ledger = WalletLedger::in_memory();
        let alice = PlayerId::new("alice");
        ledger.open_account(&alice, Amount::from_whole(1_000)).unwrap();

        let debit = ledger.debit(&alice, Amount::from_whole(100), context("Bet placed on crash")).unwrap();
        assert_eq!(debit.kind, TransactionKind::StakeDebit);
        assert_eq!(debit.balance_before, Amount::from_whole(1_000));
        assert_eq!(debit.balance_after, Amount::from_whole(900));

        let credit = ledger.credit(&alice, Amount::from_whole(200), context("Cashout")).unwrap();
        assert_eq!(credit.balance_after, Amount::from_whole(1_100));
        assert!(credit.id > debit.id);

        assert_eq!(ledger.balance(&alice).unwrap(), Amount::from_whole(1_100));
        ledger.verify_replay(&alice).unwrap();
    }

    #[test]
    fn test_insufficient_balance_has_no_effect() {
        let ledger = WalletLedger::in_memory();
        let bob = PlayerId::new("bob");
        ledger.open_account(&bob, Amount::from_whole(50)).unwrap();

        let err = ledger.debit(&bob, Amount::from_whole(51), context("Bet")).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(ledger.balance(&bob).unwrap(), Amount::from_whole(50));
        assert!(ledger.transactions(&bob).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_and_duplicate_accounts() {
        let ledger = WalletLedger::in_memory();
        let carol = PlayerId::new("carol");
        assert!(matches!(ledger.balance(&carol), Err(LedgerError::AccountNotFound(_))));

        assert!(ledger.ensure_account(&carol, Amount::from_whole(10)).unwrap());
        assert!(!ledger.ensure_account(&carol, Amount::from_whole(99)).unwrap());
        assert_eq!(ledger.balance(&carol).unwrap(), Amount::from_whole(10));
        assert!(matches!(
            ledger.open_account(&carol, Amount::ZERO),
            Err(LedgerError::AccountExists(_))
        ));
    }

    #[test]
    fn test_restore_from_journal() {
        let journal = Arc::new(MemoryJournal::new());
        let ledger = WalletLedger::new(journal.clone());
        let dave = PlayerId::new("dave");
        ledger.open_account(&dave, Amount::from_whole(500)).unwrap();
        ledger.debit(&dave, Amount::from_whole(100), context("Bet")).unwrap();
        ledger.credit(&dave, Amount::from_whole(150), context("Cashout")).unwrap();

        let restored = WalletLedger::restore(journal.records(), Arc::new(NullJournal)).unwrap();
        assert_eq!(restored.balance(&dave).unwrap(), Amount::from_whole(550));
        assert_eq!(restored.transactions(&dave).unwrap().len(), 2);
        restored.verify_replay(&dave).unwrap();

        // Ids keep increasing after a restore
        let next = restored.debit(&dave, Amount::from_whole(1), context("Bet")).unwrap();
        assert_eq!(next.id, 3);
    }

    #[test]
    fn test_restore_rejects_broken_chain() {
        let journal = Arc::new(MemoryJournal::new());
        let ledger = WalletLedger::new(journal.clone());
        let erin = PlayerId::new("erin");
        ledger.open_account(&erin, Amount::from_whole(100)).unwrap();
        ledger.debit(&erin, Amount::from_whole(10), context("Bet")).unwrap();

        let mut records = journal.records();
        if let Some(JournalRecord::Transaction(tx)) = records.last_mut() {
            tx.balance_before = Amount::from_whole(999);
        }

        assert!(matches!(
            WalletLedger::restore(records, Arc::new(NullJournal)),
            Err(LedgerError::ReplayMismatch { .. })
        ));
    }

    #[test]
    fn test_concurrent_debits_are_serialized() {
        let ledger = Arc::new(WalletLedger::in_memory());
        let frank = PlayerId::new("frank");
        ledger.open_account(&frank, Amount::from_whole(100)).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                let frank = frank.clone();
                std::thread::spawn(move || ledger.debit(&frank, Amount::from_whole(10), context("Bet")).is_ok())
            })
            .collect();
        let succeeded = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(succeeded, 10);

        assert_eq!(ledger.balance(&frank).unwrap(), Amount::ZERO);
        assert_eq!(ledger.transactions(&frank).unwrap().len(), 10);
        ledger.verify_replay(&frank).unwrap();
    }
}
