//! Append-only record of delivered message ids.
//!
//! One decimal id per line in the channel directory's `log` file. A crash
//! right after an append may leave an id recorded for a message whose slot
//! was never retired; the engine checks membership before delivering, so
//! that only costs a refetch.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::LedgerError;

/// File name of the ledger inside a channel directory.
pub const LOG_FILE: &str = "log";

/// Delivered-message ledger for one channel.
#[derive(Debug, Clone)]
pub struct DeliveryLog {
    path: PathBuf,
}

impl DeliveryLog {
    /// Ledger stored in the given channel directory.
    pub fn new(channel_dir: &Path) -> Self {
        Self {
            path: channel_dir.join(LOG_FILE),
        }
    }

    /// Return the ledger path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `id` has been recorded as delivered.
    ///
    /// An error means the answer is unknown, not "no".
    pub fn is_delivered(&self, id: u64) -> Result<bool, LedgerError> {
        let mut found = false;
        self.scan(|entry| {
            found = entry == id;
            !found
        })?;
        Ok(found)
    }

    /// Append `id` to the ledger and sync it to disk.
    pub fn record_delivered(&self, id: u64) -> Result<(), LedgerError> {
        let write_err = |source| LedgerError::Write {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(write_err)?;
        writeln!(file, "{id}").map_err(write_err)?;
        file.sync_data().map_err(write_err)?;
        Ok(())
    }

    /// All recorded ids in ledger order.
    pub fn delivered_ids(&self) -> Result<Vec<u64>, LedgerError> {
        let mut ids = Vec::new();
        self.scan(|id| {
            ids.push(id);
            true
        })?;
        Ok(ids)
    }

    /// Feed each entry to `visit` until it returns false.
    fn scan(&self, mut visit: impl FnMut(u64) -> bool) -> Result<(), LedgerError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(LedgerError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| LedgerError::Read {
                path: self.path.clone(),
                source,
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let id = trimmed.parse::<u64>().map_err(|_| LedgerError::Corrupt {
                path: self.path.clone(),
                line: index + 1,
                content: line.clone(),
            })?;
            if !visit(id) {
                break;
            }
        }
        Ok(())
    }
}
