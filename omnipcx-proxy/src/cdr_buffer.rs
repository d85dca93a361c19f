//! Durable buffer for undeliverable CDRs.
//!
//! In memory the buffer is a stack: a CDR that just failed is the first one
//! retried. Every record also carries its arrival sequence so the store is
//! always written in chronological order, and records loaded from the store
//! are handed back oldest first.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::Mutex;

use omnipcx_protocol::{CdrRecord, ProtocolError};

use crate::database::{Database, DatabaseError};

/// Shared handle to the process-wide buffer.
pub type CdrBufferHandle = Arc<Mutex<CdrBuffer>>;

/// Buffer persistence errors.
#[derive(Error, Debug)]
pub enum BufferError {
    #[error("CDR store error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to remove CDR store {path:?}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to replace CDR store {path:?}: {source}")]
    Replace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt CDR in store: {0}")]
    Corrupt(#[from] ProtocolError),
}

#[derive(Debug, Clone)]
struct Pending {
    seq: u64,
    record: CdrRecord,
}

/// Stack of CDRs awaiting delivery, persisted to an SQLite file.
#[derive(Debug)]
pub struct CdrBuffer {
    path: PathBuf,
    stack: Vec<Pending>,
    next_seq: u64,
}

impl CdrBuffer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stack: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn into_handle(self) -> CdrBufferHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Push a record; it becomes the next one returned by [`get`](Self::get).
    pub fn put(&mut self, record: CdrRecord) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stack.push(Pending { seq, record });
    }

    /// Pop the most recently buffered record.
    pub fn get(&mut self) -> Option<CdrRecord> {
        self.stack.pop().map(|p| p.record)
    }

    /// The record [`get`](Self::get) would return, left in place.
    pub fn peek(&self) -> Option<&CdrRecord> {
        self.stack.last().map(|p| &p.record)
    }

    /// Read the store, if any, into memory.
    ///
    /// The store file is left on disk until the next [`save`](Self::save),
    /// so a crash before then loses nothing. Returns the number of records
    /// loaded.
    pub fn load(&mut self) -> Result<usize, BufferError> {
        if !self.path.exists() {
            warn!(
                "CDR buffer store {:?} doesn't exist. Nothing to load",
                self.path
            );
            return Ok(0);
        }

        info!("Loading CDR buffer from {:?}", self.path);
        let db = Database::open(&self.path)?;
        let records = db
            .stored_cdrs()?
            .into_iter()
            .map(CdrRecord::from_payload)
            .collect::<Result<Vec<_>, _>>()?;

        // Stored oldest first. Renumber above anything already buffered in
        // this run, and stack newest at the bottom so the oldest pops first.
        let count = records.len();
        let base = self.next_seq;
        for (idx, record) in records.into_iter().enumerate().rev() {
            debug!("Loaded CDR '{}'", record.payload().escape_ascii());
            self.stack.push(Pending {
                seq: base + idx as u64,
                record,
            });
        }
        self.next_seq = base + count as u64;

        info!("Loaded {} CDRs from {:?}", count, self.path);
        Ok(count)
    }

    /// Replace the store with the current contents, oldest first.
    ///
    /// The records are written to a side file which is then renamed over
    /// the store, so the previous store survives any failure. On success
    /// the in-memory buffer is empty. On failure its contents are kept so
    /// the caller can retry.
    pub fn save(&mut self) -> Result<usize, BufferError> {
        if self.stack.is_empty() {
            warn!("CDR buffer is empty. Nothing to save");
            remove_if_present(&self.path)?;
            return Ok(0);
        }

        let mut ordered = self.stack.clone();
        ordered.sort_by_key(|p| p.seq);

        let staging = self.staging_path();
        remove_if_present(&staging)?;

        info!("Saving {} CDRs to {:?}", ordered.len(), self.path);
        let written = Database::open(&staging)
            .and_then(|mut db| db.insert_cdrs(ordered.iter().map(|p| p.record.payload())));
        let count = match written {
            Ok(count) => count,
            Err(e) => {
                let _ = std::fs::remove_file(&staging);
                return Err(e.into());
            }
        };

        if let Err(source) = std::fs::rename(&staging, &self.path) {
            let _ = std::fs::remove_file(&staging);
            return Err(BufferError::Replace {
                path: self.path.clone(),
                source,
            });
        }

        self.stack.clear();
        Ok(count)
    }

    /// `<path>.tmp`, where a new store is built before replacing the old one.
    fn staging_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

fn remove_if_present(path: &Path) -> Result<(), BufferError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed CDR store {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(BufferError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}
