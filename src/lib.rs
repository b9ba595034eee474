//! Record management for a small paste/drop service: texts, links and
//! grouped file uploads stored in one flat key-value namespace, with
//! burn-after-read, hidden and time-to-live behavior driven by a metadata
//! byte kept outside the serialized payload.
//!
//! ```no_run
//! use std::sync::Arc;
//! use wapb_lib::{Codec, IdGenerator, MemoryStore, Service, Storage, SystemClock};
//!
//! let storage = Storage::new(
//!     Arc::new(MemoryStore::new()),
//!     Codec::default(),
//!     Arc::new(SystemClock),
//! );
//! let service = Service::new(storage, Arc::new(IdGenerator::new()));
//! ```

pub mod clock;
pub mod codec;
pub mod error;
pub mod id;
pub mod media;
pub mod meta;
pub mod model;
pub mod negotiate;
pub mod redact;
pub mod service;
pub mod storage;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::Codec;
pub use error::{Error, Result};
pub use id::IdGenerator;
pub use meta::{Flag, Meta};
pub use model::{CommonFields, File, FileGroup, Kind, Link, Resource, Text};
pub use negotiate::{BodyFormat, CreateRequest, Negotiate, Params, ResponseFormat};
pub use service::{Created, FileContents, Service, UploadBatch, UploadPart};
pub use storage::{FetchOpts, Info, RecordInfo, Storage};
pub use store::{MemoryStore, RecordStore, SledStore};
