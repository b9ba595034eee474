use std::sync::Arc;

use wapb_lib::{
    Clock, Codec, IdGenerator, MemoryStore, RecordStore, Service, SledStore, Storage, SystemClock,
};

use super::config::{ServerConfig, StorageBackend};

/// Shared application state for the HTTP server.
pub struct AppState {
    pub service: Service,
}

impl AppState {
    pub fn new(service: Service) -> Self {
        Self { service }
    }

    /// Open the configured backend and wire the storage engine around it.
    pub fn open(config: &ServerConfig) -> wapb_lib::Result<Self> {
        let backend: Arc<dyn RecordStore> = match config.storage {
            StorageBackend::Sled => {
                tracing::info!(data_dir = %config.data_dir, "opening sled storage");
                Arc::new(SledStore::open(&config.data_dir)?)
            }
            StorageBackend::Memory => {
                tracing::info!("using in-memory storage, records are lost on exit");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::with_backend(backend, Codec::new(config.pretty_json), Arc::new(SystemClock)))
    }

    pub fn with_backend(backend: Arc<dyn RecordStore>, codec: Codec, clock: Arc<dyn Clock>) -> Self {
        let storage = Storage::new(backend, codec, clock);
        Self::new(Service::new(storage, Arc::new(IdGenerator::new())))
    }
}
