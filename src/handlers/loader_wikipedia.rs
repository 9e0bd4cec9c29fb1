//! Wikipedia loader: searches the MediaWiki API and loads article extracts.
//!
//! Two API round trips per message: a search for the query to pick article
//! titles, then a plain-text extract fetch for those titles. The number of
//! articles defaults from configuration (`wikipedia_max_docs`) and can be
//! overridden per message via `options.max_docs`. The API base URL is
//! configurable so tests can target a mock server.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::config::Settings;
use crate::envelope::{Document, Envelope, FieldMap};

use super::{merged_metadata, require_str, usize_or, Handler, HandlerError};

#[derive(Deserialize)]
struct SearchResponse {
    query: SearchQuery,
}

#[derive(Deserialize)]
struct SearchQuery {
    search: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Deserialize)]
struct ExtractResponse {
    query: ExtractQuery,
}

#[derive(Deserialize)]
struct ExtractQuery {
    pages: HashMap<String, ExtractPage>,
}

#[derive(Deserialize)]
struct ExtractPage {
    title: String,
    #[serde(default)]
    extract: String,
}

pub struct WikipediaLoader {
    http: reqwest::Client,
    base_url: String,
    max_docs: usize,
}

pub fn build(settings: &Settings) -> Result<Arc<dyn Handler>, HandlerError> {
    let http = reqwest::Client::builder()
        .timeout(settings.handlers.http_timeout)
        .build()?;
    Ok(Arc::new(WikipediaLoader {
        http,
        base_url: settings.handlers.wikipedia_base_url.clone(),
        max_docs: settings.handlers.wikipedia_max_docs,
    }))
}

impl WikipediaLoader {
    async fn search_titles(&self, query: &str, limit: usize) -> Result<Vec<String>, HandlerError> {
        let response: SearchResponse = self
            .http
            .get(&self.base_url)
            .query(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", &limit.to_string()),
                ("format", "json"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response
            .query
            .search
            .into_iter()
            .map(|hit| hit.title)
            .collect())
    }

    async fn fetch_extracts(&self, titles: &[String]) -> Result<Vec<(String, String)>, HandlerError> {
        let response: ExtractResponse = self
            .http
            .get(&self.base_url)
            .query(&[
                ("action", "query"),
                ("prop", "extracts"),
                ("explaintext", "1"),
                ("titles", titles.join("|").as_str()),
                ("format", "json"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // The pages map is keyed by page id; restore the search ranking.
        let mut by_title: HashMap<String, String> = response
            .query
            .pages
            .into_values()
            .map(|page| (page.title, page.extract))
            .collect();
        Ok(titles
            .iter()
            .filter_map(|title| by_title.remove(title).map(|extract| (title.clone(), extract)))
            .filter(|(_, extract)| !extract.is_empty())
            .collect())
    }
}

#[async_trait]
impl Handler for WikipediaLoader {
    fn name(&self) -> &'static str {
        "loader.wikipedia"
    }

    async fn process(&self, envelope: Envelope) -> Result<Envelope, HandlerError> {
        let query = require_str(&envelope.options, "query")?;
        let max_docs = usize_or(&envelope.options, "max_docs", self.max_docs)?;
        info!(query, max_docs, "searching wikipedia");

        let titles = self.search_titles(query, max_docs).await?;
        let extracts = if titles.is_empty() {
            Vec::new()
        } else {
            self.fetch_extracts(&titles).await?
        };

        let docs: Vec<Document> = extracts
            .into_iter()
            .map(|(title, extract)| {
                let mut metadata = FieldMap::default();
                metadata.insert("source".to_string(), serde_json::json!("wikipedia"));
                metadata.insert("title".to_string(), serde_json::json!(title));
                Document::with_metadata(extract, merged_metadata(&metadata, &envelope.metadata))
            })
            .collect();

        info!(query, docs = docs.len(), "wikipedia articles loaded");

        Ok(Envelope::new()
            .with_docs(docs)
            .with_metadata(envelope.metadata))
    }
}
