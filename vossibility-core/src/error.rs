//! Error taxonomy for the ingestion pipeline.
//!
//! Transport failures of the upstream client and of the sink cross the trait
//! seams as boxed errors (see [`crate::contract`]); everything the pipeline
//! decides on its own is typed here so callers can tell a malformed payload
//! apart from a transient failure.

use thiserror::Error;

/// Boxed transport error returned by [`crate::contract::Upstream`] and
/// [`crate::contract::BlobSink`] implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while building or reading a [`crate::blob::Blob`].
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("decoding payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("attribute {0:?} is absent")]
    MissingAttribute(String),

    #[error("attribute {path:?} is not {expected}")]
    WrongType { path: String, expected: &'static str },
}

/// Errors raised by [`crate::store::TransformingStore::index`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("malformed blob: {0}")]
    Blob(#[from] BlobError),

    #[error("sink write failed: {0}")]
    Sink(#[source] BoxError),
}

/// Errors returned by the live message handler.
///
/// A payload that cannot be decoded at all never reaches the caller: it is
/// logged and acknowledged. Everything that does reach the caller is worth a
/// redelivery.
#[derive(Debug, Error)]
pub enum HandleError {
    #[error("building blob for event {event:?}: {source}")]
    Blob {
        event: String,
        #[source]
        source: BlobError,
    },

    #[error("retrieve labels for issue {number}: {source}")]
    Enrichment {
        number: i64,
        #[source]
        source: BoxError,
    },

    #[error("indexing event {event:?}: {source}")]
    Store {
        event: String,
        #[source]
        source: StoreError,
    },
}

impl HandleError {
    /// Whether the queue should redeliver the message. Always true:
    /// undecodable envelopes are acknowledged by the handler and never
    /// become a `HandleError`.
    pub fn is_retryable(&self) -> bool {
        true
    }
}

/// Errors that abort the sync of a single repository.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetching page at cursor {cursor} for {repository}: {source}")]
    Fetch {
        repository: String,
        cursor: u64,
        #[source]
        source: BoxError,
    },
}
