pub mod memory;
pub mod sled_store;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::meta::Meta;
use crate::model::Kind;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

/// Envelope header: one metadata byte and a big-endian expiry timestamp.
pub const HEADER_LEN: usize = 1 + 8;

/// Compose the storage key: the kind's tag byte followed by the raw id bytes.
/// No delimiter and no length prefix.
pub fn make_key(kind: Kind, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + id.len());
    key.push(kind.tag());
    key.extend_from_slice(id.as_bytes());
    key
}

/// Recover the id from a key produced by [`make_key`].
pub fn key_id(key: &[u8]) -> Option<String> {
    let (tag, id) = key.split_first()?;
    Kind::from_tag(*tag)?;
    String::from_utf8(id.to_vec()).ok()
}

/// Record-level fields kept outside the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub meta: Meta,
    /// Unix seconds; `None` never expires.
    pub expires_at: Option<i64>,
}

impl Header {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.meta.bits());
        out.extend_from_slice(&self.expires_at.unwrap_or(0).to_be_bytes());
    }

    pub fn decode(raw: &[u8]) -> Result<Header> {
        if raw.len() < HEADER_LEN {
            return Err(Error::Storage(format!(
                "record envelope too short: {} bytes",
                raw.len()
            )));
        }
        let mut at = [0u8; 8];
        at.copy_from_slice(&raw[1..HEADER_LEN]);
        let at = i64::from_be_bytes(at);
        Ok(Header {
            meta: Meta::from_bits(raw[0]),
            expires_at: (at != 0).then_some(at),
        })
    }
}

/// What actually sits under a key: header plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(meta: Meta, expires_at: Option<i64>, payload: Vec<u8>) -> Self {
        Self {
            header: Header { meta, expires_at },
            payload,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        self.header.encode_into(&mut out);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(raw: &[u8]) -> Result<Envelope> {
        let header = Header::decode(raw)?;
        Ok(Envelope {
            header,
            payload: raw[HEADER_LEN..].to_vec(),
        })
    }
}

/// Key-value backend under the storage engine. Implementations must be
/// thread-safe; every call is atomic on its own key.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Envelope>>;

    async fn put(&self, key: &[u8], record: &Envelope) -> Result<()>;

    /// Insert unless a live (unexpired at `now`) record already holds the
    /// key. Returns whether the write happened.
    async fn put_if_absent(&self, key: &[u8], record: &Envelope, now: i64) -> Result<bool>;

    /// Replace the record under `key` with `new` only if it still equals
    /// `current`. Returns whether the swap happened.
    async fn compare_and_swap(&self, key: &[u8], current: &Envelope, new: &Envelope) -> Result<bool>;

    /// Remove a key, returning what was there.
    async fn remove(&self, key: &[u8]) -> Result<Option<Envelope>>;

    /// All records under `prefix`, in key order.
    async fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Envelope)>>;

    /// Like [`RecordStore::scan`] but without copying payloads.
    async fn scan_headers(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Header)>>;

    /// Drop every record expired at `now`. Returns how many went.
    async fn purge_expired(&self, now: i64) -> Result<usize>;

    async fn flush(&self) -> Result<()>;
}
