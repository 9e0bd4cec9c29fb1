//! # Ragbus: MQTT-connected RAG pipeline nodes
//!
//! Ragbus runs retrieval-augmented-generation pipelines as a mesh of small
//! single-purpose processes wired together over an MQTT broker. Each process
//! (a *node*) subscribes to one or more input topics, runs exactly one
//! registered handler over every JSON message it receives, and publishes the
//! handler's result to its output topics. Pipelines are composed entirely
//! through topic configuration; no node knows about any other.
//!
//! ## Core Concepts
//!
//! - **Envelope**: the JSON message every node consumes and produces, with
//!   `docs`, `options`, `outputs` and `metadata` fields
//! - **Handler**: the unit of behavior a node runs (load, chunk, embed,
//!   answer, translate)
//! - **Topic routing**: comma-separated input/output topic lists; a node with
//!   no outputs is a terminal sink
//! - **Dispatch loop**: sequential per-node message processing where one
//!   failing message never takes the node down
//!
//! ## Wiring a Pipeline
//!
//! A loader node publishing into a chunker, which feeds a vector store:
//!
//! ```text
//! RAGBUS_HANDLER=loader.web   RAGBUS_TOPICS_IN=ingest/url    RAGBUS_TOPICS_OUT=ingest/raw
//! RAGBUS_HANDLER=chunker      RAGBUS_TOPICS_IN=ingest/raw    RAGBUS_TOPICS_OUT=ingest/chunks
//! RAGBUS_HANDLER=vectorstore  RAGBUS_TOPICS_IN=ingest/chunks
//! ```
//!
//! Publishing `{"options": {"url": "https://example.com"}}` to `ingest/url`
//! then flows the page through chunking into pgvector, one process per stage.
//!
//! ## Module Guide
//!
//! - [`envelope`]: wire format and its decode/encode errors
//! - [`topics`]: topic list parsing and the input/output router
//! - [`config`]: `RAGBUS_*` environment configuration
//! - [`broker`]: MQTT connection, reconnect loop and the publish seam
//! - [`dispatch`]: the per-node receive/process/publish loop
//! - [`handlers`]: the handler trait, registry and all built-in handlers
//! - [`llm`]: OpenAI-compatible embeddings and chat completion client
//! - [`store`]: pgvector-backed document storage and similarity search
//! - [`text`]: whitespace cleanup and the recursive character splitter

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod handlers;
pub mod llm;
pub mod store;
pub mod text;
pub mod topics;
