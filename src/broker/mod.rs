//! Broker connectivity: the publish seam the dispatch loop talks to, the
//! inbound message shape, and reconnect backoff policy.
//!
//! Exactly one logical broker connection exists per node process. The
//! concrete MQTT implementation lives in [`mqtt`]; the dispatch loop only
//! sees the [`MessageBus`] trait and a `flume` receiver of
//! [`InboundMessage`], which keeps the loop testable without a running
//! broker.

pub mod mqtt;

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

pub use mqtt::MqttConnection;

/// One raw message delivered by a subscription.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Topic the message arrived on.
    pub topic: String,
    /// Raw wire bytes, not yet decoded.
    pub payload: Vec<u8>,
}

/// Broker unreachable or the connection dropped. Retried indefinitely with
/// backoff; never fatal.
#[derive(Debug, Error)]
#[error("broker connection error: {0}")]
pub struct ConnectError(#[from] pub rumqttc::ConnectionError);

/// The broker rejected or could not accept a publish. The already-processed
/// result is lost for that topic; publishing is never retried automatically
/// because a retry could duplicate a side-effecting downstream action.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish rejected: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("broker connection closed")]
    ConnectionClosed,
}

/// Publish seam between the dispatch loop and the broker connection.
///
/// Errors surface synchronously so the dispatch loop can log and count them.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

/// Bounded exponential backoff with jitter for reconnect attempts.
///
/// Delays double from `base` up to `max`; each delay is scaled by a random
/// factor in `[0.5, 1.5)` so a fleet of nodes does not reconnect in
/// lockstep. `reset` is called after a successful connect.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Default policy: 500ms doubling up to 30s.
    pub fn standard() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }

    /// Returns the next delay and advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(self.attempt))
            .min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        exp.mul_f64(jitter).min(self.max.mul_f64(1.5))
    }

    /// Forgets accumulated attempts after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
