//! Topic routing: parsing topic lists from configuration and computing the
//! publish fan-out for outbound envelopes.
//!
//! Topic lists arrive as comma-separated strings
//! (`"pipeline/chunker/default/command, pipeline/debug/tap"`). Parsing trims
//! whitespace, drops empty segments and deduplicates while preserving order.
//! A node subscribes to every input topic and treats messages from all of
//! them identically; a successful response is broadcast unmodified to every
//! output topic.

use thiserror::Error;

/// Topic configuration problems, fatal at startup.
#[derive(Debug, Error)]
pub enum TopicError {
    #[error("topic list is empty: {raw:?}")]
    EmptyList { raw: String },
    #[error("no input topics configured")]
    NoInputTopics,
}

/// Parses a comma-separated topic list into an ordered, deduplicated set.
///
/// Rejects a list that contains no topics after trimming.
pub fn parse_topics(raw: &str) -> Result<Vec<String>, TopicError> {
    let mut topics: Vec<String> = Vec::new();
    for segment in raw.split(',') {
        let topic = segment.trim();
        if topic.is_empty() {
            continue;
        }
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }
    }
    if topics.is_empty() {
        return Err(TopicError::EmptyList {
            raw: raw.to_string(),
        });
    }
    Ok(topics)
}

/// The input and output topic sets of one node process.
///
/// The router does not discriminate behavior by which input topic delivered a
/// message; it only determines where responses go. Zero output topics is a
/// legal terminal node, zero input topics is a configuration error.
#[derive(Clone, Debug)]
pub struct TopicRouter {
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl TopicRouter {
    /// Builds a router from the raw configured lists.
    ///
    /// `outputs_raw` of `None`, or an output list that parses to zero topics
    /// (commas and whitespace only), configures a terminal node that
    /// publishes nowhere.
    pub fn from_raw(inputs_raw: &str, outputs_raw: Option<&str>) -> Result<Self, TopicError> {
        let inputs = parse_topics(inputs_raw).map_err(|_| TopicError::NoInputTopics)?;
        let outputs = match outputs_raw.map(parse_topics) {
            Some(Ok(topics)) => topics,
            Some(Err(TopicError::EmptyList { .. })) | None => Vec::new(),
            Some(Err(err)) => return Err(err),
        };
        Ok(Self { inputs, outputs })
    }

    /// Topics this node subscribes to. Never empty.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Topics every response envelope is broadcast to. May be empty.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }
}
