//! Sitemap loader: fetches a sitemap and loads every listed page.
//!
//! The sitemap's `<loc>` entries are collected in document order, capped by
//! configuration (`sitemap_max_pages`, overridable per message via
//! `options.max_pages`), and each page is fetched and extracted exactly
//! like the web loader does. A page that fails to load fails the whole
//! message; partial loads would silently drop documents downstream.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::config::Settings;
use crate::envelope::Envelope;

use super::loader_web::WebLoader;
use super::{require_str, usize_or, Handler, HandlerError};

static LOC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<loc>\s*([^<]+?)\s*</loc>").expect("valid regex"));

/// Extracts `<loc>` URLs from sitemap XML, in document order.
pub(crate) fn extract_locations(xml: &str) -> Vec<String> {
    LOC_RE
        .captures_iter(xml)
        .map(|captures| captures[1].to_string())
        .collect()
}

pub struct SitemapLoader {
    http: reqwest::Client,
    web: WebLoader,
    max_pages: usize,
}

pub fn build(settings: &Settings) -> Result<Arc<dyn Handler>, HandlerError> {
    let http = reqwest::Client::builder()
        .timeout(settings.handlers.http_timeout)
        .build()?;
    Ok(Arc::new(SitemapLoader {
        web: WebLoader::with_client(http.clone()),
        http,
        max_pages: settings.handlers.sitemap_max_pages,
    }))
}

#[async_trait]
impl Handler for SitemapLoader {
    fn name(&self) -> &'static str {
        "loader.sitemap"
    }

    async fn process(&self, envelope: Envelope) -> Result<Envelope, HandlerError> {
        let url = require_str(&envelope.options, "url")?;
        let max_pages = usize_or(&envelope.options, "max_pages", self.max_pages)?;
        info!(url, max_pages, "loading sitemap");

        let xml = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let locations = extract_locations(&xml);
        let mut docs = Vec::new();
        for location in locations.iter().take(max_pages) {
            docs.push(self.web.load_page(location, &envelope.metadata).await?);
        }

        info!(
            url,
            listed = locations.len(),
            loaded = docs.len(),
            "sitemap loaded"
        );

        Ok(Envelope::new()
            .with_docs(docs)
            .with_metadata(envelope.metadata))
    }
}
