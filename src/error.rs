//! Error taxonomy shared by the storage engine, the negotiation layer and the
//! resource orchestrators.

use thiserror::Error;

use crate::model::Kind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Key absent from the store, or present but expired.
    #[error("record not found")]
    NotFound,

    /// A required field is missing or empty.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The body does not match the negotiated content type.
    #[error("malformed body: {0}")]
    Decode(String),

    /// Failure inside the underlying key-value store.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("not implemented: {0}")]
    Unsupported(&'static str),

    /// The file group vanished while an upload batch was being written.
    #[error("file group {0} was deleted during upload")]
    GroupDeleted(String),

    /// Listing a burn-flagged record whose content has no redacted form.
    #[error("cannot redact {0} records")]
    CannotRedact(Kind),
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<sled::transaction::TransactionError<Error>> for Error {
    fn from(e: sled::transaction::TransactionError<Error>) -> Self {
        match e {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(inner) => inner.into(),
        }
    }
}
