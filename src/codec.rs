use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// JSON serializer settings, built once at startup and handed to the storage
/// engine and the negotiation layer. Never mutated after construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Codec {
    pretty: bool,
}

impl Codec {
    pub const fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let out = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        };
        out.map_err(|e| Error::Storage(format!("failed to serialize record: {}", e)))
    }

    pub fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T> {
        serde_json::from_slice(buf).map_err(|e| Error::Decode(e.to_string()))
    }
}
