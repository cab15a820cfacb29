//! Player wallets: balances, transaction history and the durable journal

pub mod journal;
pub mod ledger;

pub use journal::{read_journal, FileJournal, JournalRecord, LedgerJournal, MemoryJournal, NullJournal};
pub use ledger::{TransactionContext, TransactionKind, WalletLedger, WalletTransaction};
