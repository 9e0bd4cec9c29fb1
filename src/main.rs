//! Node process entry point.
//!
//! Boots one handler against one broker connection: load configuration,
//! parse the topic routing, resolve the handler (an unknown handler name
//! aborts before anything subscribes), then run the dispatch loop until the
//! process is signalled.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ragbus::broker::mqtt::MqttConnection;
use ragbus::config::{ConfigError, Settings};
use ragbus::dispatch::DispatchLoop;
use ragbus::handlers::{HandlerRegistry, ResolveError};
use ragbus::topics::{TopicError, TopicRouter};

#[derive(Debug, Error)]
enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Topics(#[from] TopicError),
    #[error(transparent)]
    Handler(#[from] ResolveError),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

async fn run() -> Result<(), NodeError> {
    let settings = Settings::from_env()?;
    let router = TopicRouter::from_raw(&settings.topics_in, settings.topics_out.as_deref())?;

    // Resolve before touching the broker so a misconfigured node never
    // subscribes and steals messages it cannot process.
    let handler = HandlerRegistry::new().resolve(&settings)?;
    info!(
        handler = handler.name(),
        inputs = ?router.inputs(),
        outputs = ?router.outputs(),
        "node configured"
    );

    let connection = MqttConnection::connect(&settings.mqtt, router.inputs().to_vec());
    let dispatch = DispatchLoop::new(
        handler,
        router,
        Arc::new(connection.bus()),
        connection.inbound(),
        settings.static_options.clone(),
    );
    let stats = dispatch.stats();

    tokio::select! {
        _ = dispatch.run() => {
            info!("dispatch loop ended");
        }
        _ = tokio::signal::ctrl_c() => {
            info!(
                processed = stats.processed(),
                decode_failures = stats.decode_failures(),
                handler_failures = stats.handler_failures(),
                publish_failures = stats.publish_failures(),
                "shutdown signal received"
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        error!(error = %err, "node startup failed");
        std::process::exit(1);
    }
}
