//! Resource orchestration on top of the storage engine and the negotiation
//! layer. Text and Link go through the generic operations here; FileGroup
//! adds the upload protocol in [`files`].

pub mod files;

use std::sync::Arc;

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::id::{IdGenerator, MAX_ID_ATTEMPTS};
use crate::meta::Meta;
use crate::model::{Kind, Resource};
use crate::negotiate::{decode_create, encode_listing, BodyFormat, CreateRequest, Negotiate};
use crate::storage::{FetchOpts, Info, Storage};

pub use files::{FileContents, UploadBatch, UploadPart};

/// A record just written, plus the body format it was decoded from so the
/// response can echo it.
#[derive(Debug, Clone)]
pub struct Created<R> {
    pub record: R,
    pub format: BodyFormat,
}

#[derive(Clone)]
pub struct Service {
    storage: Storage,
    ids: Arc<IdGenerator>,
}

impl Service {
    pub fn new(storage: Storage, ids: Arc<IdGenerator>) -> Self {
        Self { storage, ids }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn codec(&self) -> &Codec {
        self.storage.codec()
    }

    /// Decode a create request for `R`, assign its id and timestamp, and
    /// store it.
    pub async fn create<R: Negotiate>(&self, req: &CreateRequest<'_>) -> Result<Created<R>> {
        let (mut record, format) = decode_create::<R>(req, self.codec())?;
        self.insert(&mut record).await?;
        Ok(Created { record, format })
    }

    /// Store a new record under a fresh id, retrying on collision. Whatever
    /// `id` and `created` the record carried are replaced.
    async fn insert<R: Resource>(&self, record: &mut R) -> Result<()> {
        let kind = R::KIND;
        let meta = Meta::from_common(record.common());
        let ttl = record.common().ttl;

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let id = self.ids.next_id();
            {
                let common = record.common_mut();
                common.id = id.clone();
                common.created = self.storage.now();
            }
            let buf = self.codec().encode(record)?;
            if self.storage.create(kind, &id, buf, meta, ttl).await? {
                tracing::info!(%kind, id, ttl, burn = record.common().burn_after_read, "created record");
                return Ok(());
            }
            tracing::warn!(%kind, id, attempt, "identifier collision, retrying");
        }

        tracing::error!(%kind, attempts = MAX_ID_ATTEMPTS, "identifier space exhausted");
        Err(Error::Storage("identifier space exhausted".into()))
    }

    /// Fetch one record; burn-after-read records are consumed.
    pub async fn get<R: Resource>(&self, id: &str) -> Result<R> {
        self.storage.get_typed(R::KIND, id, FetchOpts::default()).await
    }

    pub async fn delete<R: Resource>(&self, id: &str) -> Result<()> {
        self.storage.delete(R::KIND, id).await?;
        tracing::info!(kind = %R::KIND, id, "deleted record");
        Ok(())
    }

    /// The `{"data":[...]}` listing of `kind`.
    pub async fn list(&self, kind: Kind) -> Result<Vec<u8>> {
        let items = self.storage.list(kind).await?;
        encode_listing(&items, self.codec())
    }

    pub async fn info(&self, kind: Kind) -> Result<Vec<Info>> {
        self.storage.info(kind).await
    }
}
