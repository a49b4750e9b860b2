use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::contract::{BlobSink, Destination, Document};
use crate::error::BoxError;

/// In-process sink keeping the latest document per id and destination.
///
/// Used by the dry-run mode of the CLI and by tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    documents: RwLock<HashMap<(Destination, String), Document>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, destination: Destination, id: &str) -> Option<Document> {
        self.documents
            .read()
            .await
            .get(&(destination, id.to_string()))
            .cloned()
    }

    pub async fn documents(&self, destination: Destination) -> Vec<Document> {
        let mut docs: Vec<Document> = self
            .documents
            .read()
            .await
            .iter()
            .filter(|((d, _), _)| *d == destination)
            .map(|(_, doc)| doc.clone())
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        docs
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl BlobSink for MemorySink {
    async fn upsert(&self, destination: Destination, document: Document) -> Result<(), BoxError> {
        let mut documents = self.documents.write().await;
        let replaced = documents
            .insert((destination, document.id.clone()), document)
            .is_some();
        debug!(destination = destination.as_str(), replaced, "MemorySink upsert");
        Ok(())
    }
}
