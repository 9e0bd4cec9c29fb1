//! MQTT connection manager built on `rumqttc`.
//!
//! Owns the single client of a node process and a background driver task
//! that polls the event loop. On every CONNACK the full configured topic set
//! is re-subscribed, because broker-side subscriptions do not survive a
//! disconnect. Connection errors flip the readiness flag and are retried
//! forever with [`Backoff`]; the node never exits over a broken broker.
//!
//! Inbound publishes are forwarded over a bounded `flume` channel. The
//! channel bound doubles as backpressure: while the dispatch loop is busy,
//! the driver task blocks on the send instead of buffering unboundedly,
//! which preserves the one-message-at-a-time discipline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MqttSettings;

use super::{Backoff, ConnectError, InboundMessage, MessageBus, PublishError};

const CHANNEL_BOUND: usize = 64;

/// Thin publish handle over the shared MQTT client.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(PublishError::from)
    }
}

/// Subscription seam so [`Driver::step`] can be exercised without a broker.
#[async_trait]
trait Subscriber: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<(), rumqttc::ClientError>;
}

#[async_trait]
impl Subscriber for AsyncClient {
    async fn subscribe(&self, topic: &str) -> Result<(), rumqttc::ClientError> {
        AsyncClient::subscribe(self, topic, QoS::AtLeastOnce).await
    }
}

/// What the driver loop does after one event.
#[derive(Debug, PartialEq)]
enum Step {
    Continue,
    Sleep(Duration),
    Stop,
}

/// Per-event connection state: the configured topic set, the reconnect
/// backoff, and the shared readiness flag.
struct Driver {
    topics: Vec<String>,
    backoff: Backoff,
    ready: Arc<AtomicBool>,
    inbound: flume::Sender<InboundMessage>,
}

impl Driver {
    /// Processes one event-loop poll result.
    ///
    /// A CONNACK marks the connection ready and re-subscribes the full topic
    /// set; a publish is forwarded to the dispatch loop; a connection error
    /// flips readiness off and asks the loop to sleep out the backoff.
    async fn step(
        &mut self,
        polled: Result<Event, ConnectionError>,
        subscriber: &impl Subscriber,
    ) -> Step {
        match polled {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                self.backoff.reset();
                self.ready.store(true, Ordering::SeqCst);
                info!(topics = ?self.topics, "broker connected; subscribing");
                for topic in &self.topics {
                    if let Err(err) = subscriber.subscribe(topic).await {
                        error!(topic, error = %err, "subscribe failed");
                    }
                }
                Step::Continue
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                if self.inbound.send_async(message).await.is_err() {
                    debug!("dispatch loop gone; stopping broker driver");
                    return Step::Stop;
                }
                Step::Continue
            }
            Ok(_) => Step::Continue,
            Err(err) => {
                self.ready.store(false, Ordering::SeqCst);
                let err = ConnectError::from(err);
                let delay = self.backoff.next_delay();
                warn!(
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "broker connection lost; reconnecting after backoff"
                );
                Step::Sleep(delay)
            }
        }
    }
}

/// The node's single logical broker connection.
pub struct MqttConnection {
    client: AsyncClient,
    inbound: flume::Receiver<InboundMessage>,
    ready: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

impl MqttConnection {
    /// Establishes the connection and spawns the driver task.
    ///
    /// `subscribe_topics` is the full input topic set; it is subscribed on
    /// every (re)connect. Returns immediately; actual connectivity is
    /// reflected by [`MqttConnection::is_ready`].
    pub fn connect(settings: &MqttSettings, subscribe_topics: Vec<String>) -> Self {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keepalive);
        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, CHANNEL_BOUND);
        let (tx, rx) = flume::bounded(CHANNEL_BOUND);
        let ready = Arc::new(AtomicBool::new(false));

        let driver = {
            let subscriber = client.clone();
            let mut driver = Driver {
                topics: subscribe_topics,
                backoff: Backoff::standard(),
                ready: Arc::clone(&ready),
                inbound: tx,
            };
            tokio::spawn(async move {
                loop {
                    match driver.step(eventloop.poll().await, &subscriber).await {
                        Step::Continue => {}
                        Step::Sleep(delay) => tokio::time::sleep(delay).await,
                        Step::Stop => break,
                    }
                }
            })
        };

        Self {
            client,
            inbound: rx,
            ready,
            driver,
        }
    }

    /// Publish handle for the dispatch loop.
    pub fn bus(&self) -> MqttBus {
        MqttBus {
            client: self.client.clone(),
        }
    }

    /// Stream of raw inbound messages from all subscribed topics.
    pub fn inbound(&self) -> flume::Receiver<InboundMessage> {
        self.inbound.clone()
    }

    /// Whether the broker connection is currently established. Liveness for
    /// the node process: false while (re)connecting.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Shared readiness flag, for wiring into an external health probe.
    pub fn readiness(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ready)
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish};
    use std::sync::Mutex;

    struct RecordingSubscriber {
        subscribed: Mutex<Vec<String>>,
    }

    impl RecordingSubscriber {
        fn new() -> Self {
            Self {
                subscribed: Mutex::new(Vec::new()),
            }
        }

        fn subscribed(&self) -> Vec<String> {
            self.subscribed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Subscriber for RecordingSubscriber {
        async fn subscribe(&self, topic: &str) -> Result<(), rumqttc::ClientError> {
            self.subscribed.lock().unwrap().push(topic.to_string());
            Ok(())
        }
    }

    fn driver(topics: &[&str]) -> (Driver, flume::Receiver<InboundMessage>) {
        let (tx, rx) = flume::unbounded();
        let driver = Driver {
            topics: topics.iter().map(|t| t.to_string()).collect(),
            backoff: Backoff::standard(),
            ready: Arc::new(AtomicBool::new(false)),
            inbound: tx,
        };
        (driver, rx)
    }

    fn connack() -> Result<Event, ConnectionError> {
        Ok(Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        })))
    }

    fn inbound_publish(topic: &str, payload: &[u8]) -> Result<Event, ConnectionError> {
        Ok(Event::Incoming(Packet::Publish(Publish::new(
            topic,
            QoS::AtLeastOnce,
            payload.to_vec(),
        ))))
    }

    fn connection_dropped() -> Result<Event, ConnectionError> {
        Err(ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        )))
    }

    #[tokio::test]
    async fn connack_subscribes_the_full_topic_set() {
        let (mut driver, _rx) = driver(&["a", "b"]);
        let subscriber = RecordingSubscriber::new();

        let step = driver.step(connack(), &subscriber).await;

        assert_eq!(step, Step::Continue);
        assert_eq!(subscriber.subscribed(), vec!["a", "b"]);
        assert!(driver.ready.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn reconnect_after_a_drop_resubscribes_everything() {
        let (mut driver, _rx) = driver(&["a", "b"]);
        let subscriber = RecordingSubscriber::new();

        driver.step(connack(), &subscriber).await;
        let step = driver.step(connection_dropped(), &subscriber).await;
        assert!(matches!(step, Step::Sleep(_)));
        assert!(!driver.ready.load(Ordering::SeqCst));

        driver.step(connack(), &subscriber).await;
        assert_eq!(subscriber.subscribed(), vec!["a", "b", "a", "b"]);
        assert!(driver.ready.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn messages_after_a_reconnect_still_reach_the_dispatch_side() {
        let (mut driver, rx) = driver(&["a"]);
        let subscriber = RecordingSubscriber::new();

        driver.step(connack(), &subscriber).await;
        driver.step(connection_dropped(), &subscriber).await;
        driver.step(connack(), &subscriber).await;
        let step = driver.step(inbound_publish("a", b"{}"), &subscriber).await;

        assert_eq!(step, Step::Continue);
        let message = rx.try_recv().unwrap();
        assert_eq!(message.topic, "a");
        assert_eq!(message.payload, b"{}");
    }

    #[tokio::test]
    async fn successful_connect_resets_the_backoff() {
        let (mut driver, _rx) = driver(&["a"]);
        let subscriber = RecordingSubscriber::new();

        for _ in 0..6 {
            driver.step(connection_dropped(), &subscriber).await;
        }
        driver.step(connack(), &subscriber).await;

        match driver.step(connection_dropped(), &subscriber).await {
            Step::Sleep(delay) => assert!(delay <= Duration::from_millis(750)),
            other => panic!("expected a backoff sleep, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn driver_stops_when_the_dispatch_side_is_gone() {
        let (mut driver, rx) = driver(&["a"]);
        let subscriber = RecordingSubscriber::new();
        drop(rx);

        let step = driver.step(inbound_publish("a", b"{}"), &subscriber).await;
        assert_eq!(step, Step::Stop);
    }

    #[tokio::test]
    async fn other_packets_are_ignored() {
        let (mut driver, _rx) = driver(&["a"]);
        let subscriber = RecordingSubscriber::new();

        let step = driver
            .step(Ok(Event::Incoming(Packet::PingResp)), &subscriber)
            .await;

        assert_eq!(step, Step::Continue);
        assert!(subscriber.subscribed().is_empty());
    }
}
