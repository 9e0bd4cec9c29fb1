//! Text loader: wraps inline text from the command options into a document.
//!
//! The simplest pipeline entry point, and the one used to smoke-test a
//! deployed topology end to end.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::Settings;
use crate::envelope::{Document, Envelope};

use super::{require_str, Handler, HandlerError};

pub struct TextLoader;

pub fn build(_settings: &Settings) -> Result<Arc<dyn Handler>, HandlerError> {
    Ok(Arc::new(TextLoader))
}

#[async_trait]
impl Handler for TextLoader {
    fn name(&self) -> &'static str {
        "loader.text"
    }

    async fn process(&self, envelope: Envelope) -> Result<Envelope, HandlerError> {
        let text = require_str(&envelope.options, "text")?;
        info!(chars = text.len(), "loading inline text");

        let doc = Document::with_metadata(text, envelope.metadata.clone());
        Ok(Envelope::new()
            .with_docs(vec![doc])
            .with_metadata(envelope.metadata))
    }
}
