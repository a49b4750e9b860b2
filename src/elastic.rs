use async_trait::async_trait;
use reqwest::Url;
use tracing::{debug, error, info};
use vossibility_core::error::BoxError;
use vossibility_core::{BlobSink, Destination, Document};

use crate::load_config::SinkSection;

/// Writes documents to Elasticsearch with `PUT /{index}/_doc/{id}`, which
/// creates or replaces the document: replays land on the same id.
pub struct ElasticsearchSink {
    http: reqwest::Client,
    url: Url,
    live_index: String,
    snapshot_index: String,
}

impl ElasticsearchSink {
    pub fn new(config: &SinkSection) -> Result<Self, BoxError> {
        let url = Url::parse(&config.url)?;
        if url.cannot_be_a_base() {
            return Err(format!("sink url {url} cannot be a base url").into());
        }
        info!(
            url = %url,
            live_index = %config.live_index,
            snapshot_index = %config.snapshot_index,
            "Initialized Elasticsearch sink"
        );
        Ok(ElasticsearchSink {
            http: reqwest::Client::new(),
            url,
            live_index: config.live_index.clone(),
            snapshot_index: config.snapshot_index.clone(),
        })
    }

    pub fn index_for(&self, destination: Destination) -> &str {
        match destination {
            Destination::Live => &self.live_index,
            Destination::Snapshot => &self.snapshot_index,
        }
    }

    /// Document URL; the id is percent-encoded as a single path segment.
    pub fn document_url(&self, destination: Destination, id: &str) -> Result<Url, BoxError> {
        let mut url = self.url.clone();
        url.path_segments_mut()
            .map_err(|_| "sink url cannot be a base url")?
            .pop_if_empty()
            .extend([self.index_for(destination), "_doc", id]);
        Ok(url)
    }
}

#[async_trait]
impl BlobSink for ElasticsearchSink {
    async fn upsert(&self, destination: Destination, document: Document) -> Result<(), BoxError> {
        let url = self.document_url(destination, &document.id)?;
        let resp = self.http.put(url.clone()).json(&document).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
            error!(status = %status, url = %url, "Elasticsearch rejected document");
            return Err(format!("Elasticsearch returned {status} for {url}: {body}").into());
        }
        debug!(url = %url, status = %status, "Indexed document");
        Ok(())
    }
}
