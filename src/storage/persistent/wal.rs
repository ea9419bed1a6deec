//! Write-ahead log of committed transactions.
//!
//! Every committed transaction becomes exactly one entry holding its whole
//! mutation list, so replay applies a transaction completely or not at all.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-encoded WalEntry]
//! [ENTRY 2: codec-encoded WalEntry]
//! ...
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::storage::Mutation;

use super::codec;

/// A single committed transaction in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When the transaction committed.
    pub timestamp: DateTime<Utc>,
    /// The transaction's writes, in application order.
    pub mutations: Vec<Mutation>,
}

struct WalWriter {
    file: File,
    sequence: u64,
    /// Set when a failed append could not be cut back off the file.
    failed: bool,
}

/// Append-only log of committed transactions.
///
/// Thread-safe via internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    inner: Mutex<WalWriter>,
    sync_on_write: bool,
}

fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned lock: wal")
}

impl WriteAheadLog {
    /// Open or create a WAL file.
    ///
    /// An existing file is scanned to find the last sequence number. A torn
    /// entry at the tail (crash mid-append) is cut off so later appends land
    /// directly after the last complete transaction.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let exists = path.exists() && std::fs::metadata(path)?.len() >= codec::HEADER_LEN;

        let sequence = if exists {
            let (sequence, valid_len) = Self::scan(path)?;
            let file_len = std::fs::metadata(path)?.len();
            if valid_len < file_len {
                warn!(
                    path = %path.display(),
                    valid_len,
                    file_len,
                    "truncating torn WAL tail"
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
            sequence
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            0
        };

        let file = OpenOptions::new().append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(WalWriter {
                file,
                sequence,
                failed: false,
            }),
            sync_on_write,
        })
    }

    fn lock(&self) -> IoResult<MutexGuard<'_, WalWriter>> {
        self.inner.lock().map_err(|_| poisoned())
    }

    /// Append one committed transaction.
    ///
    /// Returns the sequence number assigned to the entry. The entry is
    /// written (and fsynced when configured) before this returns. If the
    /// write fails, the file is truncated back to its previous length so no
    /// part of the entry survives; if that truncation fails too, the log
    /// refuses every later append.
    pub fn append(&self, mutations: &[Mutation]) -> IoResult<u64> {
        let mut inner = self.lock()?;
        if inner.failed {
            return Err(IoError::new(
                ErrorKind::Other,
                "WAL is unusable after a failed append; reopen the store",
            ));
        }

        let candidate = inner.sequence + 1;
        let entry = WalEntry {
            sequence: candidate,
            timestamp: Utc::now(),
            mutations: mutations.to_vec(),
        };
        let encoded = codec::encode(&entry)?;

        let prev_len = inner.file.metadata()?.len();
        if let Err(err) = self.write_entry(&mut inner.file, &encoded) {
            let cut_back = inner.file.set_len(prev_len).and_then(|()| inner.file.sync_all());
            if let Err(cut) = cut_back {
                error!(
                    path = %self.path.display(),
                    prev_len,
                    error = %cut,
                    "failed to cut back a failed WAL append"
                );
                inner.failed = true;
            }
            return Err(err);
        }

        inner.sequence = candidate;
        Ok(candidate)
    }

    fn write_entry(&self, file: &mut File, encoded: &[u8]) -> IoResult<()> {
        file.write_all(encoded)?;
        file.flush()?;
        if self.sync_on_write {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Iterate over all entries in the WAL.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Get the current sequence number.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.lock()?.sequence)
    }

    /// Get the WAL file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Returns the last complete sequence and the byte length it ends at.
    fn scan(path: &Path) -> IoResult<(u64, u64)> {
        let mut iter = WalIterator::new(path)?;
        let mut last_seq = 0;
        let mut valid_len = codec::HEADER_LEN;

        loop {
            match iter.next() {
                None => break,
                Some(Ok(entry)) => {
                    last_seq = entry.sequence;
                    valid_len = iter.position()?;
                }
                Some(Err(e)) => return Err(e),
            }
        }

        Ok((last_seq, valid_len))
    }
}

/// Iterator over WAL entries.
///
/// Stops cleanly at a torn tail entry; yields an error for a corrupted one.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        codec::read_header(&mut reader)?;

        Ok(Self { reader, file_size })
    }

    fn position(&mut self) -> IoResult<u64> {
        self.reader.stream_position()
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}
