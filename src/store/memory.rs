use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Envelope, Header, RecordStore};
use crate::error::Result;

/// In-memory record storage backed by a `RwLock<BTreeMap>`. Contents are
/// lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<Vec<u8>, Envelope>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Envelope>> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn put(&self, key: &[u8], record: &Envelope) -> Result<()> {
        let mut data = self.data.write().await;
        data.insert(key.to_vec(), record.clone());
        Ok(())
    }

    async fn put_if_absent(&self, key: &[u8], record: &Envelope, now: i64) -> Result<bool> {
        let mut data = self.data.write().await;
        if data.get(key).is_some_and(|old| !old.header.is_expired(now)) {
            return Ok(false);
        }
        data.insert(key.to_vec(), record.clone());
        Ok(true)
    }

    async fn compare_and_swap(&self, key: &[u8], current: &Envelope, new: &Envelope) -> Result<bool> {
        let mut data = self.data.write().await;
        if data.get(key) != Some(current) {
            return Ok(false);
        }
        data.insert(key.to_vec(), new.clone());
        Ok(true)
    }

    async fn remove(&self, key: &[u8]) -> Result<Option<Envelope>> {
        let mut data = self.data.write().await;
        Ok(data.remove(key))
    }

    async fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Envelope)>> {
        let data = self.data.read().await;
        Ok(data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn scan_headers(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Header)>> {
        let data = self.data.read().await;
        Ok(data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.header))
            .collect())
    }

    async fn purge_expired(&self, now: i64) -> Result<usize> {
        let mut data = self.data.write().await;
        let before = data.len();
        data.retain(|_, v| !v.header.is_expired(now));
        Ok(before - data.len())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
