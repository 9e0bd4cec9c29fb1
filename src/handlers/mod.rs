//! Pluggable message handlers and the registry that resolves them.
//!
//! A handler is the single unit of behavior a node process runs: it receives
//! the full inbound [`Envelope`] and returns a full outbound one. Handlers
//! may perform arbitrary external I/O (HTTP fetches, embedding calls,
//! database writes) but never touch broker subscriptions or topic routing;
//! that is the dispatch loop's job. From the dispatch loop's point of view a
//! handler runs to completion before the next message is taken.
//!
//! Handlers are responsible for carrying forward any `docs`/`metadata` they
//! want downstream; the runtime does not auto-merge fields. A handler that
//! forgets to forward `metadata` silently drops it.
//!
//! The registry is an explicit name-to-constructor table built once at
//! startup. An unknown name is fatal before the node subscribes to anything.

pub mod chat;
pub mod chunker;
pub mod loader_sitemap;
pub mod loader_text;
pub mod loader_web;
pub mod loader_wikipedia;
pub mod translate;
pub mod vectorstore;

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::config::Settings;
use crate::envelope::{value_kind, Envelope, FieldMap};

/// A handler's external dependency failed, timed out, or the message did not
/// satisfy the handler's contract. Always contained to the offending
/// message.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("missing required option {key:?}")]
    MissingOption { key: String },
    #[error("option {key:?} has wrong type: expected {expected}, found {found}")]
    InvalidOption {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("llm api error: {0}")]
    Llm(String),
    #[error("vector store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("handler output could not be serialized: {0}")]
    Serde(#[from] serde_json::Error),
}

/// The handler name from configuration matches nothing in the registry.
/// Fatal at startup.
#[derive(Debug, Error)]
#[error("unknown handler {name:?} (known: {known})")]
pub struct UnknownHandlerError {
    pub name: String,
    pub known: String,
}

/// The capability a node process wraps: one envelope in, one envelope out.
#[async_trait]
pub trait Handler: Send + Sync {
    /// The registry name this handler answers to.
    fn name(&self) -> &'static str;

    /// Processes one inbound envelope into one outbound envelope.
    ///
    /// Options from node configuration are already merged into
    /// `envelope.options` when this is called, with per-message values
    /// winning.
    async fn process(&self, envelope: Envelope) -> Result<Envelope, HandlerError>;
}

type HandlerBuilder = fn(&Settings) -> Result<Arc<dyn Handler>, HandlerError>;

/// Static dispatch table from handler name to constructor.
///
/// Built once at startup; resolution happens exactly once per process, never
/// per message.
pub struct HandlerRegistry {
    builders: FxHashMap<&'static str, HandlerBuilder>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut builders: FxHashMap<&'static str, HandlerBuilder> = FxHashMap::default();
        builders.insert("loader.text", loader_text::build);
        builders.insert("loader.web", loader_web::build);
        builders.insert("loader.sitemap", loader_sitemap::build);
        builders.insert("loader.wikipedia", loader_wikipedia::build);
        builders.insert("chunker", chunker::build);
        builders.insert("vectorstore", vectorstore::build);
        builders.insert("chat", chat::build);
        builders.insert("translate", translate::build);
        Self { builders }
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all registered handlers, sorted.
    pub fn known_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.builders.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Resolves and constructs the handler selected by configuration.
    pub fn resolve(
        &self,
        settings: &Settings,
    ) -> Result<Arc<dyn Handler>, ResolveError> {
        let builder =
            self.builders
                .get(settings.handler.as_str())
                .ok_or_else(|| UnknownHandlerError {
                    name: settings.handler.clone(),
                    known: self.known_names().join(", "),
                })?;
        Ok(builder(settings)?)
    }
}

/// Startup-time handler resolution failure.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Unknown(#[from] UnknownHandlerError),
    #[error("handler construction failed: {0}")]
    Build(#[from] HandlerError),
}

/// Fetches a required string option, failing per-message when it is absent
/// or has the wrong type.
pub fn require_str<'a>(options: &'a FieldMap, key: &str) -> Result<&'a str, HandlerError> {
    match options.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(HandlerError::InvalidOption {
            key: key.to_string(),
            expected: "string",
            found: value_kind(other),
        }),
        None => Err(HandlerError::MissingOption {
            key: key.to_string(),
        }),
    }
}

/// Fetches an optional string option; absent keys yield `None`, wrong types
/// fail gracefully.
pub fn optional_str<'a>(options: &'a FieldMap, key: &str) -> Result<Option<&'a str>, HandlerError> {
    match options.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(HandlerError::InvalidOption {
            key: key.to_string(),
            expected: "string",
            found: value_kind(other),
        }),
    }
}

/// Fetches an optional unsigned integer option with a default.
pub fn usize_or(options: &FieldMap, key: &str, default: usize) -> Result<usize, HandlerError> {
    match options.get(key) {
        None => Ok(default),
        Some(Value::Number(n)) if n.as_u64().is_some() => {
            Ok(n.as_u64().unwrap_or_default() as usize)
        }
        Some(other) => Err(HandlerError::InvalidOption {
            key: key.to_string(),
            expected: "unsigned integer",
            found: value_kind(other),
        }),
    }
}

/// Merges two metadata maps, with entries from `overlay` winning.
pub fn merged_metadata(base: &FieldMap, overlay: &FieldMap) -> FieldMap {
    let mut merged = base.clone();
    for (key, value) in overlay {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_settings(handler: &str) -> Settings {
        Settings::from_lookup(|key| match key {
            "RAGBUS_HANDLER" => Some(handler.to_string()),
            "RAGBUS_TOPICS_IN" => Some("in".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn registry_knows_all_handlers() {
        let registry = HandlerRegistry::new();
        assert_eq!(
            registry.known_names(),
            vec![
                "chat",
                "chunker",
                "loader.sitemap",
                "loader.text",
                "loader.web",
                "loader.wikipedia",
                "translate",
                "vectorstore",
            ]
        );
    }

    #[test]
    fn resolves_configured_handler() {
        let registry = HandlerRegistry::new();
        let handler = registry.resolve(&test_settings("loader.text")).unwrap();
        assert_eq!(handler.name(), "loader.text");
    }

    #[test]
    fn unknown_handler_is_an_error() {
        let registry = HandlerRegistry::new();
        let err = registry.resolve(&test_settings("does.not.exist")).err().unwrap();
        let message = err.to_string();
        assert!(message.contains("does.not.exist"));
        assert!(message.contains("chunker"));
    }

    #[test]
    fn require_str_distinguishes_missing_from_mistyped() {
        let mut options = FieldMap::default();
        options.insert("text".to_string(), json!(42));

        assert!(matches!(
            require_str(&options, "text"),
            Err(HandlerError::InvalidOption { expected: "string", .. })
        ));
        assert!(matches!(
            require_str(&options, "absent"),
            Err(HandlerError::MissingOption { .. })
        ));
    }

    #[test]
    fn usize_or_defaults_and_validates() {
        let mut options = FieldMap::default();
        options.insert("k".to_string(), json!(7));
        options.insert("bad".to_string(), json!("seven"));

        assert_eq!(usize_or(&options, "k", 3).unwrap(), 7);
        assert_eq!(usize_or(&options, "missing", 3).unwrap(), 3);
        assert!(usize_or(&options, "bad", 3).is_err());
    }

    #[test]
    fn merged_metadata_overlay_wins() {
        let mut base = FieldMap::default();
        base.insert("source".to_string(), json!("web"));
        base.insert("language".to_string(), json!("en"));
        let mut overlay = FieldMap::default();
        overlay.insert("language".to_string(), json!("de"));

        let merged = merged_metadata(&base, &overlay);
        assert_eq!(merged["source"], json!("web"));
        assert_eq!(merged["language"], json!("de"));
    }
}
