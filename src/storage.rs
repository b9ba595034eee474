//! The storage engine: typed records in one flat key space.
//!
//! Every operation is atomic on its own key. Sequences built from several
//! calls (burn-then-delete, the upload protocol) are not, and two readers of
//! a burn-after-read record may both see it before either delete lands.
//! [`Storage::update`] is the exception: it retries until its write lands on
//! the value it read.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::clock::Clock;
use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::meta::{Flag, Meta, MetaView};
use crate::model::Kind;
use crate::redact::redact;
use crate::store::{key_id, make_key, Envelope, RecordStore};

/// Rounds of read-modify-write before an update under contention gives up.
const UPDATE_ATTEMPTS: usize = 16;

/// Per-read options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOpts {
    /// Read without consuming a burn-after-read record.
    pub skip_burn: bool,
}

impl FetchOpts {
    pub const DONT_BURN: FetchOpts = FetchOpts { skip_burn: true };
}

/// Record-level state of one key, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordInfo {
    pub meta: Meta,
    pub expires_at: Option<i64>,
}

/// One entry of an administrative enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Info {
    pub id: String,
    #[serde(flatten)]
    pub meta: MetaView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn RecordStore>,
    codec: Codec,
    clock: Arc<dyn Clock>,
}

impl Storage {
    pub fn new(backend: Arc<dyn RecordStore>, codec: Codec, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            codec,
            clock,
        }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    fn expiry(&self, ttl: i64) -> Option<i64> {
        (ttl > 0).then(|| self.now().saturating_add(ttl))
    }

    // ── Writes ──────────────────────────────────────────────────

    /// Write a record, replacing whatever was there. A positive `ttl` makes
    /// the record expire that many seconds from now.
    pub async fn put(&self, kind: Kind, id: &str, buf: Vec<u8>, meta: Meta, ttl: i64) -> Result<()> {
        self.put_until(kind, id, buf, meta, self.expiry(ttl)).await
    }

    /// Write a record with an absolute expiry.
    pub async fn put_until(
        &self,
        kind: Kind,
        id: &str,
        buf: Vec<u8>,
        meta: Meta,
        expires_at: Option<i64>,
    ) -> Result<()> {
        let record = Envelope::new(meta, expires_at, buf);
        self.backend.put(&make_key(kind, id), &record).await
    }

    /// Write a record only if its key is free. Returns `false` when a live
    /// record already owns the id.
    pub async fn create(&self, kind: Kind, id: &str, buf: Vec<u8>, meta: Meta, ttl: i64) -> Result<bool> {
        self.create_until(kind, id, buf, meta, self.expiry(ttl)).await
    }

    pub async fn create_until(
        &self,
        kind: Kind,
        id: &str,
        buf: Vec<u8>,
        meta: Meta,
        expires_at: Option<i64>,
    ) -> Result<bool> {
        let record = Envelope::new(meta, expires_at, buf);
        self.backend
            .put_if_absent(&make_key(kind, id), &record, self.now())
            .await
    }

    // ── Reads ───────────────────────────────────────────────────

    async fn fetch(&self, kind: Kind, id: &str) -> Result<(Vec<u8>, Envelope)> {
        let key = make_key(kind, id);
        match self.backend.get(&key).await? {
            Some(record) if !record.header.is_expired(self.now()) => Ok((key, record)),
            Some(_) => {
                // stale; drop it now rather than waiting for the sweeper
                if let Err(e) = self.backend.remove(&key).await {
                    tracing::debug!(%kind, id, error = %e, "failed to drop expired record");
                }
                Err(Error::NotFound)
            }
            None => Err(Error::NotFound),
        }
    }

    /// Read one record's payload. A burn-after-read record is deleted on the
    /// way out unless `opts` says otherwise; a failed delete is logged and
    /// the payload still returned.
    pub async fn get_bytes(&self, kind: Kind, id: &str, opts: FetchOpts) -> Result<Vec<u8>> {
        let (key, record) = self.fetch(kind, id).await?;

        if record.header.meta.has(Flag::BurnAfterRead) && !opts.skip_burn {
            match self.backend.remove(&key).await {
                Ok(_) => tracing::debug!(%kind, id, "burned record after read"),
                Err(e) => tracing::warn!(%kind, id, error = %e, "failed to burn record after read"),
            }
        }

        Ok(record.payload)
    }

    pub async fn get_typed<T: DeserializeOwned>(&self, kind: Kind, id: &str, opts: FetchOpts) -> Result<T> {
        let buf = self.get_bytes(kind, id, opts).await?;
        self.codec.decode(&buf)
    }

    /// Metadata and expiry of one record. Never burns.
    pub async fn get_info(&self, kind: Kind, id: &str) -> Result<RecordInfo> {
        let (_, record) = self.fetch(kind, id).await?;
        Ok(RecordInfo {
            meta: record.header.meta,
            expires_at: record.header.expires_at,
        })
    }

    /// Read-modify-write of one record, keeping its metadata and expiry.
    /// When another writer changes the record in between, `update` runs
    /// again on the fresh value. Never burns.
    pub async fn update<T, F>(&self, kind: Kind, id: &str, mut update: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(&mut T),
    {
        for attempt in 1..=UPDATE_ATTEMPTS {
            let (key, current) = self.fetch(kind, id).await?;
            let mut value: T = self.codec.decode(&current.payload)?;
            update(&mut value);
            let next = Envelope::new(
                current.header.meta,
                current.header.expires_at,
                self.codec.encode(&value)?,
            );
            if self.backend.compare_and_swap(&key, &current, &next).await? {
                return Ok(value);
            }
            tracing::debug!(%kind, id, attempt, "record changed during update, retrying");
        }
        Err(Error::Storage(format!("{} {} kept changing during update", kind, id)))
    }

    // ── Deletes ─────────────────────────────────────────────────

    pub async fn delete(&self, kind: Kind, id: &str) -> Result<()> {
        match self.backend.remove(&make_key(kind, id)).await? {
            Some(record) if !record.header.is_expired(self.now()) => Ok(()),
            _ => Err(Error::NotFound),
        }
    }

    /// Remove everything whose TTL has run out.
    pub async fn purge_expired(&self) -> Result<usize> {
        self.backend.purge_expired(self.now()).await
    }

    pub async fn flush(&self) -> Result<()> {
        self.backend.flush().await
    }

    // ── Scans ───────────────────────────────────────────────────

    /// Payloads of every visible record of `kind`, in key order. Hidden
    /// records are skipped; burn-after-read records are redacted but not
    /// consumed.
    pub async fn list(&self, kind: Kind) -> Result<Vec<Vec<u8>>> {
        let now = self.now();
        let mut out = Vec::new();
        for (_, record) in self.backend.scan(&[kind.tag()]).await? {
            let header = record.header;
            if header.is_expired(now) || header.meta.has(Flag::Hidden) {
                continue;
            }
            if header.meta.has(Flag::BurnAfterRead) {
                out.push(redact(kind, &record.payload, &self.codec)?);
            } else {
                out.push(record.payload);
            }
        }
        Ok(out)
    }

    /// Ids and metadata of every live record of `kind`, hidden ones
    /// included. Payloads are never decoded.
    pub async fn info(&self, kind: Kind) -> Result<Vec<Info>> {
        let now = self.now();
        let headers = self.backend.scan_headers(&[kind.tag()]).await?;
        Ok(headers
            .into_iter()
            .filter(|(_, h)| !h.is_expired(now))
            .filter_map(|(key, h)| {
                Some(Info {
                    id: key_id(&key)?,
                    meta: h.meta.into(),
                    expires_at: h.expires_at,
                })
            })
            .collect())
    }
}
