//! Append-only wallet journal
//!
//! The ledger writes one `JournalRecord` per account opening and per
//! transaction, before it mutates in-memory state. `FileJournal` never
//! blocks the caller: lines are queued on a channel and a background task
//! writes them with bounded retry.

use crate::crash::types::PlayerId;
use crate::errors::StorageError;
use crate::metrics::EngineMetrics;
use crate::money::Amount;
use crate::wallet::ledger::WalletTransaction;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// One durable ledger entry. Records are never edited or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum JournalRecord {
    AccountOpened {
        player: PlayerId,
        opening_balance: Amount,
        at: DateTime<Utc>,
    },
    Transaction(WalletTransaction),
}

/// Durable sink for ledger records.
///
/// `append` is called while a player's account is locked, so
/// implementations must not wait on I/O.
pub trait LedgerJournal: Send + Sync {
    fn append(&self, record: &JournalRecord) -> Result<(), StorageError>;
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullJournal;

impl LedgerJournal for NullJournal {
    fn append(&self, _record: &JournalRecord) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Keeps records in memory; used by tests and replay checks
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: Mutex<Vec<JournalRecord>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<JournalRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl LedgerJournal for MemoryJournal {
    fn append(&self, record: &JournalRecord) -> Result<(), StorageError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

enum JournalCommand {
    Append(String),
    Flush(oneshot::Sender<()>),
}

/// JSON Lines journal written by a background task
pub struct FileJournal {
    path: PathBuf,
    sender: Mutex<Option<mpsc::UnboundedSender<JournalCommand>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl FileJournal {
    /// Open (or create) the journal for appending and start the writer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open<P: AsRef<Path>>(
        path: P,
        retry_attempts: u32,
        retry_backoff: Duration,
        metrics: Option<Arc<EngineMetrics>>,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::OpenFailed(format!("{}: {}", parent.display(), e)))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::OpenFailed(format!("{}: {}", path.display(), e)))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(
            tokio::fs::File::from_std(file),
            path.clone(),
            receiver,
            retry_attempts.max(1),
            retry_backoff,
            metrics,
        ));

        tracing::info!("📒 Wallet journal open at {}", path.display());

        Ok(Self {
            path,
            sender: Mutex::new(Some(sender)),
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait until every record queued so far has been written
    pub async fn flush(&self) -> Result<(), StorageError> {
        let (ack, done) = oneshot::channel();
        self.send(JournalCommand::Flush(ack))?;
        done.await
            .map_err(|_| StorageError::WriteFailed("journal writer stopped".to_string()))
    }

    /// Drain pending writes and stop the writer. Later appends fail.
    pub async fn close(&self) -> Result<(), StorageError> {
        let sender = self.sender.lock().take();
        drop(sender);
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            writer
                .await
                .map_err(|e| StorageError::WriteFailed(format!("journal writer panicked: {}", e)))?;
        }
        Ok(())
    }

    fn send(&self, command: JournalCommand) -> Result<(), StorageError> {
        let guard = self.sender.lock();
        let sender = guard
            .as_ref()
            .ok_or_else(|| StorageError::WriteFailed("journal closed".to_string()))?;
        sender
            .send(command)
            .map_err(|_| StorageError::WriteFailed("journal writer stopped".to_string()))
    }
}

impl LedgerJournal for FileJournal {
    fn append(&self, record: &JournalRecord) -> Result<(), StorageError> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| StorageError::WriteFailed(format!("serialize record: {}", e)))?;
        line.push('\n');
        self.send(JournalCommand::Append(line))
    }
}

async fn write_loop(
    mut file: tokio::fs::File,
    path: PathBuf,
    mut receiver: mpsc::UnboundedReceiver<JournalCommand>,
    retry_attempts: u32,
    retry_backoff: Duration,
    metrics: Option<Arc<EngineMetrics>>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            JournalCommand::Append(line) => {
                let mut attempt = 1;
                loop {
                    match file.write_all(line.as_bytes()).await {
                        Ok(()) => break,
                        Err(e) if attempt < retry_attempts => {
                            tracing::warn!(
                                "Journal write to {} failed (attempt {}/{}): {}",
                                path.display(),
                                attempt,
                                retry_attempts,
                                e
                            );
                            tokio::time::sleep(retry_backoff * attempt).await;
                            attempt += 1;
                        }
                        Err(e) => {
                            tracing::error!(
                                "❌ Dropping journal record after {} attempts on {}: {}",
                                retry_attempts,
                                path.display(),
                                e
                            );
                            if let Some(ref metrics) = metrics {
                                metrics.record_journal_failure();
                            }
                            break;
                        }
                    }
                }
            }
            JournalCommand::Flush(ack) => {
                if let Err(e) = file.flush().await {
                    tracing::warn!("Journal flush on {} failed: {}", path.display(), e);
                }
                let _ = ack.send(());
            }
        }
    }

    if let Err(e) = file.flush().await {
        tracing::warn!("Final journal flush on {} failed: {}", path.display(), e);
    }
    tracing::debug!("Journal writer for {} stopped", path.display());
}

/// Read every record from a journal file. A missing file is an empty journal.
pub fn read_journal<P: AsRef<Path>>(path: P) -> Result<Vec<JournalRecord>, StorageError> {
    let path = path.as_ref();
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::ReadFailed(format!("{}: {}", path.display(), e))),
    };

    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| StorageError::ReadFailed(format!("{}: {}", path.display(), e)))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| StorageError::CorruptedRecord {
            line: index + 1,
            reason: e.to_string(),
        })?;
        records.push(record);
    }

    Ok(records)
}
