//! Web loader: fetches a URL and extracts readable text from the HTML.
//!
//! Extraction keeps the title, headings, paragraphs and list items and
//! ignores scripts, styles and markup noise; the result is whitespace
//! cleaned before it enters the pipeline. Produced document metadata
//! carries the source URL and the page title (when present), merged under
//! the envelope's own metadata.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::info;

use crate::config::Settings;
use crate::envelope::{Document, Envelope, FieldMap};
use crate::text::clean_text_body;

use super::{merged_metadata, require_str, Handler, HandlerError};

static CONTENT_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("title, h1, h2, h3, h4, h5, h6, p, li, pre, blockquote")
        .expect("valid selector")
});
static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("valid selector"));

/// Extracts readable text from an HTML page.
pub(crate) fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts: Vec<String> = Vec::new();
    for element in document.select(&CONTENT_SELECTOR) {
        let text: String = element.text().collect::<Vec<_>>().join(" ");
        let text = text.trim();
        if !text.is_empty() {
            parts.push(text.to_string());
        }
    }
    clean_text_body(&parts.join("\n"))
}

/// The `<title>` of an HTML page, if any.
pub(crate) fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|title| title.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty())
}

pub struct WebLoader {
    http: reqwest::Client,
}

pub fn build(settings: &Settings) -> Result<Arc<dyn Handler>, HandlerError> {
    let http = reqwest::Client::builder()
        .timeout(settings.handlers.http_timeout)
        .build()?;
    Ok(Arc::new(WebLoader { http }))
}

impl WebLoader {
    /// Shares an HTTP client with another loader (the sitemap loader reuses
    /// the page extraction here).
    pub(crate) fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub(crate) async fn load_page(
        &self,
        url: &str,
        envelope_metadata: &FieldMap,
    ) -> Result<Document, HandlerError> {
        let parsed = url::Url::parse(url).map_err(|source| HandlerError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let html = self
            .http
            .get(parsed)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let mut metadata = FieldMap::default();
        metadata.insert("source".to_string(), serde_json::json!(url));
        if let Some(title) = extract_title(&html) {
            metadata.insert("title".to_string(), serde_json::json!(title));
        }

        Ok(Document::with_metadata(
            extract_text(&html),
            merged_metadata(&metadata, envelope_metadata),
        ))
    }
}

#[async_trait]
impl Handler for WebLoader {
    fn name(&self) -> &'static str {
        "loader.web"
    }

    async fn process(&self, envelope: Envelope) -> Result<Envelope, HandlerError> {
        let url = require_str(&envelope.options, "url")?;
        info!(url, "loading web page");

        let doc = self.load_page(url, &envelope.metadata).await?;
        info!(url, chars = doc.page_content.len(), "web page loaded");

        Ok(Envelope::new()
            .with_docs(vec![doc])
            .with_metadata(envelope.metadata))
    }
}
