//! The single funnel every blob passes through before reaching the sink.
//!
//! [`TransformingStore::index`] applies the configured [`Transformations`],
//! derives the document identity and upserts it into the chosen
//! [`Destination`]:
//!
//! - live documents are keyed by `user/repo/<natural key>/<delivery>`, so a
//!   redelivered event lands on the same document;
//! - snapshot documents are keyed by `user/repo/<natural key>`, so each sync
//!   overwrites the previous state of the object.

use std::sync::Arc;

use tracing::{debug, error};

use crate::blob::Blob;
use crate::contract::{BlobSink, Destination, Document};
use crate::error::StoreError;
use crate::repository::Repository;
use crate::transform::Transformations;

pub struct TransformingStore<S: ?Sized> {
    sink: Arc<S>,
    transformations: Transformations,
}

impl<S> TransformingStore<S>
where
    S: BlobSink + ?Sized,
{
    pub fn new(sink: Arc<S>, transformations: Transformations) -> Self {
        Self {
            sink,
            transformations,
        }
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    pub async fn index(
        &self,
        destination: Destination,
        repository: &Repository,
        blob: Blob,
    ) -> Result<(), StoreError> {
        let natural_key = blob.natural_key().map_err(|e| {
            error!(
                repository = %repository.full_name(),
                kind = %blob.kind,
                delivery = %blob.delivery,
                error = %e,
                "Blob has no natural key, not indexing"
            );
            e
        })?;

        let document = self.document(destination, repository, &natural_key, blob);
        debug!(
            destination = destination.as_str(),
            id = %document.id,
            "Upserting document"
        );
        self.sink
            .upsert(destination, document)
            .await
            .map_err(StoreError::Sink)
    }

    fn document(
        &self,
        destination: Destination,
        repository: &Repository,
        natural_key: &str,
        blob: Blob,
    ) -> Document {
        let full_name = repository.full_name();
        let id = match destination {
            Destination::Live => format!("{full_name}/{natural_key}/{}", blob.delivery),
            Destination::Snapshot => format!("{full_name}/{natural_key}"),
        };
        let Blob {
            kind,
            delivery,
            data,
            timestamp,
        } = blob;
        let data = self.transformations.apply(&kind, data);
        Document {
            id,
            repository: full_name,
            kind,
            delivery,
            timestamp,
            data,
        }
    }
}
