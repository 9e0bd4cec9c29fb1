//! Chat responder: retrieval-augmented question answering.
//!
//! Embeds the question, retrieves the nearest chunks from the vector
//! collection (restricted to rows whose metadata contains the envelope's
//! `metadata`, so callers can scope a conversation to one source), and asks
//! the chat model with the retrieved context inlined. The answer and the
//! top context excerpts are reported through `outputs`; no documents are
//! forwarded.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::config::Settings;
use crate::envelope::{Envelope, FieldMap};
use crate::llm::{ChatMessage, LlmClient};
use crate::store::{DocumentStore, PgVectorStore};

use super::{require_str, usize_or, Handler, HandlerError};

const RAG_SYSTEM_PROMPT: &str = "You are an assistant for question-answering tasks. \
    Use the provided context to answer the question. If you don't know the answer, \
    say that you don't know. Keep the answer concise.";

const DEFAULT_TOP_K: usize = 5;
const CONTEXT_EXCERPTS: usize = 2;

pub struct ChatResponder {
    store: Arc<dyn DocumentStore>,
    llm: LlmClient,
    chat_model: String,
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
    Ok(Arc::new(ChatResponder {
        store: Arc::new(store),
        llm,
        chat_model: settings.handlers.chat_model.clone(),
        embedding_model: settings.handlers.embedding_model.clone(),
    }))
}

#[async_trait]
impl Handler for ChatResponder {
    fn name(&self) -> &'static str {
        "chat"
    }

    async fn process(&self, envelope: Envelope) -> Result<Envelope, HandlerError> {
        let query = require_str(&envelope.options, "query")?;
        let top_k = usize_or(&envelope.options, "k", DEFAULT_TOP_K)?;
        info!(query, top_k, "answering question");

        let query_embedding = self
            .llm
            .embed(&self.embedding_model, &[query.to_string()])
            .await?;
        let query_embedding = query_embedding
            .first()
            .ok_or_else(|| HandlerError::Llm("no embedding for query".to_string()))?;

        let filter = serde_json::to_value(&envelope.metadata)?;
        let retrieved = self
            .store
            .similarity_search(query_embedding, top_k, &filter)
            .await?;

        let context_text: String = retrieved
            .iter()
            .map(|doc| doc.page_content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let answer = self
            .llm
            .chat(
                &self.chat_model,
                &[
                    ChatMessage::system(RAG_SYSTEM_PROMPT),
                    ChatMessage::user(format!(
                        "Question: {query}\n\nContext:\n{context_text}"
                    )),
                ],
            )
            .await?;

        let context: Vec<serde_json::Value> = retrieved
            .iter()
            .take(CONTEXT_EXCERPTS)
            .map(|doc| {
                json!({
                    "id": doc.id,
                    "content": doc.page_content,
                    "metadata": doc.metadata,
                })
            })
            .collect();

        info!(
            answer_chars = answer.len(),
            context_count = context.len(),
            "question answered"
        );

        let mut outputs = FieldMap::default();
        outputs.insert("answer".to_string(), json!(answer));
        outputs.insert("context".to_string(), json!(context));

        Ok(Envelope::new()
            .with_outputs(outputs)
            .with_metadata(envelope.metadata))
    }
}
