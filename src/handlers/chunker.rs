//! Chunker: splits each inbound document into overlapping chunks.
//!
//! Chunk size and overlap default from node configuration and can be
//! overridden per message through `options.chunk_size` /
//! `options.chunk_overlap`. Each chunk inherits its source document's
//! metadata; envelope metadata is forwarded untouched.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::Settings;
use crate::envelope::{Document, Envelope};
use crate::text::{strip_duplicate_newlines, TextSplitter};

use super::{usize_or, Handler, HandlerError};

pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

pub fn build(settings: &Settings) -> Result<Arc<dyn Handler>, HandlerError> {
    Ok(Arc::new(Chunker {
        chunk_size: settings.handlers.chunk_size,
        chunk_overlap: settings.handlers.chunk_overlap,
    }))
}

#[async_trait]
impl Handler for Chunker {
    fn name(&self) -> &'static str {
        "chunker"
    }

    async fn process(&self, envelope: Envelope) -> Result<Envelope, HandlerError> {
        let chunk_size = usize_or(&envelope.options, "chunk_size", self.chunk_size)?;
        let chunk_overlap = usize_or(&envelope.options, "chunk_overlap", self.chunk_overlap)?;
        let splitter = TextSplitter::new(chunk_size, chunk_overlap);

        let mut docs = Vec::new();
        for doc in &envelope.docs {
            let cleaned = strip_duplicate_newlines(&doc.page_content);
            for chunk in splitter.split(&cleaned) {
                docs.push(Document::with_metadata(chunk, doc.metadata.clone()));
            }
        }

        info!(
            input_docs = envelope.docs.len(),
            chunks = docs.len(),
            chunk_size,
            chunk_overlap,
            "chunked documents"
        );

        Ok(Envelope::new()
            .with_docs(docs)
            .with_metadata(envelope.metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::FieldMap;
    use serde_json::json;

    fn chunker() -> Chunker {
        Chunker {
            chunk_size: 20,
            chunk_overlap: 0,
        }
    }

    #[tokio::test]
    async fn splits_long_documents() {
        let envelope = Envelope::new().with_docs(vec![Document::new(
            "one two three four five six seven eight nine ten",
        )]);
        let response = chunker().process(envelope).await.unwrap();
        assert!(response.docs.len() > 1);
        for doc in &response.docs {
            assert!(doc.page_content.chars().count() <= 20);
        }
    }

    #[tokio::test]
    async fn chunks_inherit_document_metadata() {
        let mut metadata = FieldMap::default();
        metadata.insert("source".to_string(), json!("https://example.com"));
        let envelope = Envelope::new().with_docs(vec![Document::with_metadata(
            "words words words words words words words",
            metadata,
        )]);
        let response = chunker().process(envelope).await.unwrap();
        for doc in &response.docs {
            assert_eq!(doc.metadata["source"], json!("https://example.com"));
        }
    }

    #[tokio::test]
    async fn per_message_options_override_defaults() {
        let mut options = FieldMap::default();
        options.insert("chunk_size".to_string(), json!(1000));
        let envelope = Envelope::new()
            .with_docs(vec![Document::new(
                "one two three four five six seven eight nine ten",
            )])
            .with_options(options);
        let response = chunker().process(envelope).await.unwrap();
        assert_eq!(response.docs.len(), 1);
    }

    #[tokio::test]
    async fn mistyped_chunk_size_fails_gracefully() {
        let mut options = FieldMap::default();
        options.insert("chunk_size".to_string(), json!("big"));
        let envelope = Envelope::new().with_options(options);
        let err = chunker().process(envelope).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidOption { .. }));
    }

    #[tokio::test]
    async fn empty_docs_yield_empty_docs() {
        let response = chunker().process(Envelope::new()).await.unwrap();
        assert!(response.docs.is_empty());
    }

    #[tokio::test]
    async fn stacked_blank_lines_are_collapsed_before_splitting() {
        let envelope = Envelope::new().with_docs(vec![Document::new("alpha\n\n\n\nbeta")]);
        let response = chunker().process(envelope).await.unwrap();
        assert_eq!(response.docs.len(), 1);
        assert_eq!(response.docs[0].page_content, "alpha\n\nbeta");
    }
}
