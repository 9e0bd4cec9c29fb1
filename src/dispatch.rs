//! The per-process dispatch loop: decode, handle, encode, publish.
//!
//! One loop runs per node process and fully processes one message before
//! taking the next, so at most one handler invocation (and therefore one
//! external API call) is in flight per node. Ordering is deterministic per
//! input stream; throughput scales horizontally by running more node
//! processes, not by in-process concurrency.
//!
//! Per-message failures (undecodable payload, handler error, rejected
//! publish) are logged, counted and contained; they never crash the process
//! or stall the loop. The loop ends only when the inbound stream closes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::broker::{InboundMessage, MessageBus};
use crate::envelope::{Envelope, FieldMap};
use crate::handlers::Handler;
use crate::topics::TopicRouter;

/// Monotonic counters describing the life of one dispatch loop.
///
/// Shared behind an `Arc` so health probes and tests can observe a running
/// loop.
#[derive(Debug, Default)]
pub struct DispatchStats {
    processed: AtomicU64,
    decode_failures: AtomicU64,
    handler_failures: AtomicU64,
    publish_failures: AtomicU64,
}

impl DispatchStats {
    /// Messages fully processed (handler succeeded; publishes attempted).
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Messages dropped because the payload did not decode.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Messages dropped because the handler failed.
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }

    /// Individual topic publishes rejected by the broker.
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }
}

/// The node runtime's core: wires the resolved handler between the inbound
/// stream and the topic router.
pub struct DispatchLoop {
    handler: Arc<dyn Handler>,
    router: TopicRouter,
    bus: Arc<dyn MessageBus>,
    inbound: flume::Receiver<InboundMessage>,
    static_options: FieldMap,
    stats: Arc<DispatchStats>,
}

impl DispatchLoop {
    /// `static_options` are node-level option defaults merged into every
    /// inbound envelope; per-message values win.
    pub fn new(
        handler: Arc<dyn Handler>,
        router: TopicRouter,
        bus: Arc<dyn MessageBus>,
        inbound: flume::Receiver<InboundMessage>,
        static_options: FieldMap,
    ) -> Self {
        Self {
            handler,
            router,
            bus,
            inbound,
            static_options,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Shared counters; clone before calling [`DispatchLoop::run`].
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Runs until the inbound stream closes.
    pub async fn run(self) {
        info!(handler = self.handler.name(), "dispatch loop started");
        while let Ok(message) = self.inbound.recv_async().await {
            self.handle_message(message).await;
        }
        info!(
            processed = self.stats.processed(),
            "inbound stream closed; dispatch loop stopping"
        );
    }

    async fn handle_message(&self, message: InboundMessage) {
        let mut envelope = match Envelope::from_bytes(&message.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(
                    topic = %message.topic,
                    payload = %preview(&message.payload),
                    error = %err,
                    "dropping undecodable message"
                );
                self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        for (key, value) in &self.static_options {
            envelope
                .options
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        let response = match self.handler.process(envelope).await {
            Ok(response) => response,
            Err(err) => {
                error!(
                    handler = self.handler.name(),
                    topic = %message.topic,
                    error = %err,
                    "handler failed; message dropped"
                );
                self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        // Encode once so every output topic receives byte-identical bytes.
        let payload = match response.to_bytes() {
            Ok(payload) => payload,
            Err(err) => {
                error!(
                    handler = self.handler.name(),
                    error = %err,
                    "handler produced an unencodable envelope; message dropped"
                );
                self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        for topic in self.router.outputs() {
            if let Err(err) = self.bus.publish(topic, payload.clone()).await {
                error!(topic, error = %err, "publish failed; response lost for this topic");
                self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        debug!(
            handler = self.handler.name(),
            topic = %message.topic,
            outputs = self.router.outputs().len(),
            "message processed"
        );
        self.stats.processed.fetch_add(1, Ordering::Relaxed);
    }
}

const PREVIEW_LIMIT: usize = 256;

/// Lossy truncated rendering of a raw payload for log lines.
fn preview(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    if text.chars().count() <= PREVIEW_LIMIT {
        return text.into_owned();
    }
    let truncated: String = text.chars().take(PREVIEW_LIMIT).collect();
    format!("{truncated}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_passes_short_payloads_through() {
        assert_eq!(preview(b"{\"docs\":[]}"), "{\"docs\":[]}");
    }

    #[test]
    fn preview_truncates_long_payloads() {
        let long = vec![b'x'; 1000];
        let rendered = preview(&long);
        assert!(rendered.chars().count() <= PREVIEW_LIMIT + 1);
        assert!(rendered.ends_with('…'));
    }

    #[test]
    fn preview_tolerates_invalid_utf8() {
        let rendered = preview(&[0xff, 0xfe, b'a']);
        assert!(rendered.contains('a'));
    }
}
