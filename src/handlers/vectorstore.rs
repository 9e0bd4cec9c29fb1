//! Vector store writer: embeds inbound documents and persists them.
//!
//! Typically a terminal node (no output topics), but when wired with
//! outputs it forwards the stored documents unchanged and reports the
//! collection name and insert count through `outputs`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::Settings;
use crate::envelope::Envelope;
use crate::llm::LlmClient;
use crate::store::{DocumentStore, PgVectorStore};

use super::{Handler, HandlerError};

pub struct VectorStoreWriter {
    store: Arc<dyn DocumentStore>,
    llm: LlmClient,
    embedding_model: String,
}

pub fn build(settings: &Settings) -> Result<Arc<dyn Handler>, HandlerError> {
    let store = PgVectorStore::connect_lazy(
        &settings.handlers.pg_url,
        &settings.handlers.pg_collection,
    )?;
    let llm = LlmClient::new(
        settings.handlers.openai_base_url.clone(),
        settings.handlers.openai_api_key.clone(),
        settings.handlers.http_timeout,
    )?;
    Ok(Arc::new(VectorStoreWriter {
        store: Arc::new(store),
        llm,
        embedding_model: settings.handlers.embedding_model.clone(),
    }))
}

#[async_trait]
impl Handler for VectorStoreWriter {
    fn name(&self) -> &'static str {
        "vectorstore"
    }

    async fn process(&self, envelope: Envelope) -> Result<Envelope, HandlerError> {
        info!(
            docs = envelope.docs.len(),
            collection = self.store.collection(),
            "storing documents"
        );

        let texts: Vec<String> = envelope
            .docs
            .iter()
            .map(|doc| doc.page_content.clone())
            .collect();
        let embeddings = self.llm.embed(&self.embedding_model, &texts).await?;
        let stored = self.store.add_documents(&envelope.docs, &embeddings).await?;

        info!(
            docs_added = stored,
            collection = self.store.collection(),
            "documents stored"
        );

        let mut outputs = crate::envelope::FieldMap::default();
        outputs.insert(
            "collection".to_string(),
            serde_json::json!(self.store.collection()),
        );
        outputs.insert("docs_added".to_string(), serde_json::json!(stored));

        Ok(Envelope::new()
            .with_docs(envelope.docs)
            .with_outputs(outputs)
            .with_metadata(envelope.metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Document, FieldMap};
    use crate::store::testing::MemoryStore;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn builds_without_a_running_database() {
        let settings = Settings::from_lookup(|key| match key {
            "RAGBUS_HANDLER" => Some("vectorstore".to_string()),
            "RAGBUS_TOPICS_IN" => Some("in".to_string()),
            _ => None,
        })
        .unwrap();
        let handler = build(&settings).unwrap();
        assert_eq!(handler.name(), "vectorstore");
    }

    #[tokio::test]
    async fn embeds_and_stores_every_document() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(200).json_body(json!({
                    "data": [
                        {"embedding": [0.1, 0.2]},
                        {"embedding": [0.3, 0.4]}
                    ]
                }));
            })
            .await;

        let store = Arc::new(MemoryStore::new("docs"));
        let handler = VectorStoreWriter {
            store: store.clone(),
            llm: LlmClient::new(server.base_url(), None, Duration::from_secs(5)).unwrap(),
            embedding_model: "test-model".to_string(),
        };

        let mut metadata = FieldMap::default();
        metadata.insert("trace_id".to_string(), json!("t-9"));
        let envelope = Envelope::new()
            .with_docs(vec![Document::new("first"), Document::new("second")])
            .with_metadata(metadata);

        let response = handler.process(envelope).await.unwrap();

        let added = store.added();
        assert_eq!(added.len(), 2);
        assert_eq!(added[0].0.page_content, "first");
        assert_eq!(added[0].1, vec![0.1, 0.2]);
        assert_eq!(added[1].0.page_content, "second");
        assert_eq!(added[1].1, vec![0.3, 0.4]);

        assert_eq!(response.outputs["collection"], json!("docs"));
        assert_eq!(response.outputs["docs_added"], json!(2));
        assert_eq!(response.docs.len(), 2);
        assert_eq!(response.metadata["trace_id"], json!("t-9"));
    }

    #[tokio::test]
    async fn empty_docs_store_nothing_without_an_embedding_call() {
        let server = MockServer::start_async().await;
        let embeddings = server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(200).json_body(json!({"data": []}));
            })
            .await;

        let store = Arc::new(MemoryStore::new("docs"));
        let handler = VectorStoreWriter {
            store: store.clone(),
            llm: LlmClient::new(server.base_url(), None, Duration::from_secs(5)).unwrap(),
            embedding_model: "test-model".to_string(),
        };

        let response = handler.process(Envelope::new()).await.unwrap();

        assert_eq!(embeddings.hits_async().await, 0);
        assert!(store.added().is_empty());
        assert_eq!(response.outputs["docs_added"], json!(0));
    }
}
