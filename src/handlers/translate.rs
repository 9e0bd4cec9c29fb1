//! Translator: rewrites each inbound document into a target language.
//!
//! Two model calls per document: a language detection probe, then the
//! translation itself. A document whose language cannot be detected is
//! forwarded untranslated. Translated documents carry
//! `metadata.language = <target>`; the target defaults from configuration
//! and can be overridden per message via `options.language`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::config::Settings;
use crate::envelope::{Document, Envelope};
use crate::llm::{ChatMessage, LlmClient};

use super::{merged_metadata, optional_str, Handler, HandlerError};

const DETECT_PROMPT: &str = "Identify the language of the user's text. \
    Reply with only the ISO 639-1 code, or the word unknown.";

pub struct Translator {
    llm: LlmClient,
    model: String,
    language: String,
}

pub fn build(settings: &Settings) -> Result<Arc<dyn Handler>, HandlerError> {
    let llm = LlmClient::new(
        settings.handlers.openai_base_url.clone(),
        settings.handlers.openai_api_key.clone(),
        settings.handlers.http_timeout,
    )?;
    Ok(Arc::new(Translator {
        llm,
        model: settings.handlers.translate_model.clone(),
        language: settings.handlers.translate_language.clone(),
    }))
}

impl Translator {
    async fn detect_language(&self, text: &str) -> Result<Option<String>, HandlerError> {
        let reply = self
            .llm
            .chat(
                &self.model,
                &[
                    ChatMessage::system(DETECT_PROMPT),
                    ChatMessage::user(text.chars().take(500).collect::<String>()),
                ],
            )
            .await?;
        let code = reply.trim().to_lowercase();
        if code.is_empty() || code == "unknown" {
            return Ok(None);
        }
        Ok(Some(code))
    }

    async fn translate(&self, text: &str, target: &str) -> Result<String, HandlerError> {
        self.llm
            .chat(
                &self.model,
                &[
                    ChatMessage::system(format!(
                        "Translate the user's text into the language with ISO 639-1 code \
                         {target:?}. Reply with only the translation."
                    )),
                    ChatMessage::user(text),
                ],
            )
            .await
    }
}

#[async_trait]
impl Handler for Translator {
    fn name(&self) -> &'static str {
        "translate"
    }

    async fn process(&self, envelope: Envelope) -> Result<Envelope, HandlerError> {
        let target = optional_str(&envelope.options, "language")?
            .unwrap_or(&self.language)
            .to_string();
        info!(docs = envelope.docs.len(), target, "translating documents");

        let mut docs = Vec::with_capacity(envelope.docs.len());
        let mut translated = 0usize;
        for doc in &envelope.docs {
            match self.detect_language(&doc.page_content).await? {
                Some(detected) => {
                    let text = if detected == target {
                        doc.page_content.clone()
                    } else {
                        translated += 1;
                        self.translate(&doc.page_content, &target).await?
                    };
                    let mut metadata = doc.metadata.clone();
                    metadata.insert("language".to_string(), json!(target.clone()));
                    docs.push(Document::with_metadata(
                        text,
                        merged_metadata(&metadata, &envelope.metadata),
                    ));
                }
                None => {
                    info!("language not detected; forwarding untranslated");
                    docs.push(doc.clone());
                }
            }
        }

        info!(translated, total = docs.len(), "translation finished");

        Ok(Envelope::new()
            .with_docs(docs)
            .with_metadata(envelope.metadata))
    }
}
