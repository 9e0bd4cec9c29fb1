//! The shared message envelope exchanged on every pipeline topic.
//!
//! Every node in the pipeline speaks the same JSON envelope: an ordered list
//! of documents plus three loosely-typed maps. Different node types populate
//! different subsets, so every top-level field is optional on the wire and
//! defaults to empty when absent. Unknown top-level fields are retained
//! verbatim so that older nodes can forward messages produced by newer ones.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "docs": [ { "page_content": "...", "metadata": { } } ],
//!   "options": { },
//!   "outputs": { },
//!   "metadata": { }
//! }
//! ```
//!
//! # Field semantics
//!
//! - `docs`: ordered processing payload; the runtime never reorders or
//!   truncates it, only handlers transform it.
//! - `options`: handler parameters (query text, chunk size, ...); keys a
//!   handler does not recognize are ignored, never rejected.
//! - `outputs`: write-only scratch space handlers use to report status and
//!   counts downstream.
//! - `metadata`: advisory cross-cutting annotations. No schema is enforced;
//!   the documented keys are `source`, `trace_id`, `author` and `language`,
//!   all strings. Loaders merge envelope metadata into the metadata of the
//!   documents they produce.
//!
//! # Examples
//!
//! ```
//! use ragbus::envelope::Envelope;
//!
//! let envelope = Envelope::from_bytes(br#"{"options":{"text":"hello"}}"#).unwrap();
//! assert!(envelope.docs.is_empty());
//! assert_eq!(envelope.options["text"], serde_json::json!("hello"));
//!
//! let bytes = envelope.to_bytes().unwrap();
//! assert_eq!(Envelope::from_bytes(&bytes).unwrap(), envelope);
//! ```

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Loosely-typed string-to-JSON map used by the envelope's `options`,
/// `outputs` and `metadata` fields and by document metadata.
pub type FieldMap = FxHashMap<String, Value>;

/// A unit of textual content flowing through the pipeline.
///
/// Documents are immutable once produced: chunking and storage consume them
/// and emit new `Document` values rather than mutating sources in place.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// The text body of the document.
    #[serde(default)]
    pub page_content: String,
    /// Per-document annotations (source URL, title, language, ...).
    #[serde(default)]
    pub metadata: FieldMap,
}

impl Document {
    /// Creates a document with the given content and empty metadata.
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: FieldMap::default(),
        }
    }

    /// Creates a document with content and metadata.
    #[must_use]
    pub fn with_metadata(page_content: impl Into<String>, metadata: FieldMap) -> Self {
        Self {
            page_content: page_content.into(),
            metadata,
        }
    }
}

/// The unit of exchange on every topic.
///
/// All four fields are optional on the wire; a missing field decodes to its
/// empty value. Encoding always emits all four fields, so every envelope a
/// node publishes is structurally valid even when the handler output is
/// empty. Top-level fields this version does not know about are preserved in
/// `extra` and re-emitted on encode.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Ordered document payload. Insertion order is the processing order.
    #[serde(default)]
    pub docs: Vec<Document>,
    /// Handler-specific parameters.
    #[serde(default)]
    pub options: FieldMap,
    /// Status and counts reported for downstream consumers.
    #[serde(default)]
    pub outputs: FieldMap,
    /// Advisory cross-cutting annotations.
    #[serde(default)]
    pub metadata: FieldMap,
    /// Unknown top-level fields, kept intact for forward compatibility.
    #[serde(flatten)]
    pub extra: FxHashMap<String, Value>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the document payload.
    #[must_use]
    pub fn with_docs(mut self, docs: Vec<Document>) -> Self {
        self.docs = docs;
        self
    }

    /// Replaces the options map.
    #[must_use]
    pub fn with_options(mut self, options: FieldMap) -> Self {
        self.options = options;
        self
    }

    /// Replaces the outputs map.
    #[must_use]
    pub fn with_outputs(mut self, outputs: FieldMap) -> Self {
        self.outputs = outputs;
        self
    }

    /// Replaces the metadata map.
    #[must_use]
    pub fn with_metadata(mut self, metadata: FieldMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Decodes an envelope from wire bytes.
    ///
    /// Fails when the payload is not valid JSON, when `docs` is present but
    /// not a sequence, or when `options`/`outputs`/`metadata` are present but
    /// not mappings. Absent fields are not an error.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(DecodeError::from)
    }

    /// Encodes the envelope to wire bytes.
    ///
    /// Never fails for an envelope built from JSON-compatible values; the
    /// `Result` exists so a misbehaving handler surfaces as a per-message
    /// failure instead of a panic.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        serde_json::to_vec(self).map_err(EncodeError::from)
    }
}

/// Malformed inbound payload: not JSON, or a field with the wrong shape.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid envelope payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Envelope could not be serialized back to wire bytes.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to encode envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// Human-readable name of a JSON value's kind, for error messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_decodes_to_empty_envelope() {
        let envelope = Envelope::from_bytes(b"{}").unwrap();
        assert!(envelope.docs.is_empty());
        assert!(envelope.options.is_empty());
        assert!(envelope.outputs.is_empty());
        assert!(envelope.metadata.is_empty());
    }

    #[test]
    fn round_trip_preserves_envelope() {
        let mut options = FieldMap::default();
        options.insert("query".to_string(), json!("rust lifetimes"));
        options.insert("k".to_string(), json!(5));
        let mut metadata = FieldMap::default();
        metadata.insert("trace_id".to_string(), json!("t-123"));

        let envelope = Envelope::new()
            .with_docs(vec![
                Document::new("first"),
                Document::with_metadata("second", metadata.clone()),
            ])
            .with_options(options)
            .with_metadata(metadata);

        let bytes = envelope.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn docs_order_survives_round_trip() {
        let docs: Vec<Document> = (0..10).map(|i| Document::new(format!("doc {i}"))).collect();
        let envelope = Envelope::new().with_docs(docs.clone());
        let decoded = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.docs, docs);
    }

    #[test]
    fn invalid_json_is_a_decode_error() {
        for payload in [&b"not json"[..], b"", b"\xff\xfe", b"[1,2,3", b"nul"] {
            assert!(Envelope::from_bytes(payload).is_err());
        }
    }

    #[test]
    fn wrong_field_shapes_are_decode_errors() {
        assert!(Envelope::from_bytes(br#"{"docs": "nope"}"#).is_err());
        assert!(Envelope::from_bytes(br#"{"options": []}"#).is_err());
        assert!(Envelope::from_bytes(br#"{"outputs": 3}"#).is_err());
        assert!(Envelope::from_bytes(br#"{"metadata": "x"}"#).is_err());
    }

    #[test]
    fn top_level_json_scalars_are_decode_errors() {
        assert!(Envelope::from_bytes(b"42").is_err());
        assert!(Envelope::from_bytes(b"\"string\"").is_err());
        assert!(Envelope::from_bytes(b"[]").is_err());
    }

    #[test]
    fn unknown_top_level_fields_are_preserved() {
        let raw = br#"{"docs":[],"future_field":{"a":1},"schema_version":2}"#;
        let envelope = Envelope::from_bytes(raw).unwrap();
        assert_eq!(envelope.extra["future_field"], json!({"a": 1}));
        assert_eq!(envelope.extra["schema_version"], json!(2));

        let decoded = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn encode_always_emits_all_four_fields() {
        let bytes = Envelope::new().to_bytes().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        for field in ["docs", "options", "outputs", "metadata"] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
    }

    #[test]
    fn value_kind_names() {
        assert_eq!(value_kind(&json!(null)), "null");
        assert_eq!(value_kind(&json!(true)), "boolean");
        assert_eq!(value_kind(&json!(1)), "number");
        assert_eq!(value_kind(&json!("s")), "string");
        assert_eq!(value_kind(&json!([])), "array");
        assert_eq!(value_kind(&json!({})), "object");
    }
}
