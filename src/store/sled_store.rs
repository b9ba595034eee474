use std::path::Path;

use async_trait::async_trait;
use sled::transaction::{abort, ConflictableTransactionResult};

use super::{Envelope, Header, RecordStore};
use crate::error::{Error, Result};

/// Persistent record storage backed by sled.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn new(db: sled::Db) -> Self {
        Self { db }
    }

    /// Open a sled database at the given directory path.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let path = data_dir.as_ref();
        let db = sled::open(path)
            .map_err(|e| Error::Storage(format!("failed to open sled db at {}: {}", path.display(), e)))?;
        Ok(Self::new(db))
    }

    /// A throwaway database removed when dropped.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::new(db))
    }
}

#[async_trait]
impl RecordStore for SledStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Envelope>> {
        match self.db.get(key)? {
            Some(raw) => Ok(Some(Envelope::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &[u8], record: &Envelope) -> Result<()> {
        self.db.insert(key, record.encode())?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &[u8], record: &Envelope, now: i64) -> Result<bool> {
        let raw = record.encode();
        let inserted = self.db.transaction(|tx| -> ConflictableTransactionResult<bool, Error> {
            if let Some(old) = tx.get(key)? {
                let live = match Header::decode(&old) {
                    Ok(h) => !h.is_expired(now),
                    Err(e) => return abort(e),
                };
                if live {
                    return Ok(false);
                }
            }
            tx.insert(key, raw.as_slice())?;
            Ok(true)
        })?;
        Ok(inserted)
    }

    async fn compare_and_swap(&self, key: &[u8], current: &Envelope, new: &Envelope) -> Result<bool> {
        let swapped = self
            .db
            .compare_and_swap(key, Some(current.encode()), Some(new.encode()))?;
        Ok(swapped.is_ok())
    }

    async fn remove(&self, key: &[u8]) -> Result<Option<Envelope>> {
        match self.db.remove(key)? {
            Some(raw) => Ok(Some(Envelope::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Envelope)>> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, raw) = item?;
            out.push((key.to_vec(), Envelope::decode(&raw)?));
        }
        Ok(out)
    }

    async fn scan_headers(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Header)>> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, raw) = item?;
            out.push((key.to_vec(), Header::decode(&raw)?));
        }
        Ok(out)
    }

    async fn purge_expired(&self, now: i64) -> Result<usize> {
        let mut purged = 0;
        for item in self.db.iter() {
            let (key, raw) = item?;
            let expired = match Header::decode(&raw) {
                Ok(h) => h.is_expired(now),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping undecodable record during purge");
                    false
                }
            };
            if !expired {
                continue;
            }
            // only remove the exact value we saw; a concurrent rewrite wins
            if self
                .db
                .compare_and_swap(&key, Some(&raw), None::<sled::IVec>)?
                .is_ok()
            {
                purged += 1;
            }
        }
        Ok(purged)
    }

    async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}
