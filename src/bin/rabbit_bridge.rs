//! rabbit-bridge: application events to RabbitMQ
//!
//! Standalone composition of the bridge around an in-process event service.
//! Events are read from stdin as JSON lines and republished through the
//! configured transformers.
//!
//! ## Input
//! ```text
//! {"event": "user.created", "payload": {"data": {"id": 7}}}
//! {"event": "user.deleted"}
//! ```
//!
//! ## Configuration
//! - `--config <path>` / RABBIT_BRIDGE_CONFIG: YAML settings file
//! - RABBIT_BRIDGE_LOG: tracing filter (default: info)
//!
//! Exits 0 after a clean close on SIGINT/SIGTERM/SIGQUIT or panic, 1 if
//! closing the broker connection fails.

use std::process::ExitCode;
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use rabbit_bridge::config::Config;
use rabbit_bridge::events::ChannelEventService;
use rabbit_bridge::plugin::{amqp_connector, create_bridge};
use rabbit_bridge::shutdown::{shutdown, ShutdownSignals};
use rabbit_bridge::transform::TransformerRegistry;
use rabbit_bridge::utils::bootstrap::{init_tracing, parse_config_path};
use rabbit_bridge::AppContext;

/// One line of stdin input.
#[derive(Debug, Deserialize)]
struct InboundEvent {
    event: String,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

async fn feed_stdin(events: Arc<ChannelEventService>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match serde_json::from_str::<InboundEvent>(&line) {
                Ok(inbound) => {
                    events.emit(&inbound.event, inbound.payload);
                }
                Err(e) => warn!(error = %e, "Ignoring malformed input line"),
            },
            Ok(None) => {
                info!("stdin closed, no further events will be read");
                break;
            }
            Err(e) => {
                error!(error = %e, "Failed to read stdin");
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    init_tracing();

    let mut signals = ShutdownSignals::install()?;

    let config = Config::load(parse_config_path().as_deref()).map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    let events = Arc::new(ChannelEventService::new());
    let ctx = AppContext::new("rabbit-bridge", events.clone());

    let bridge = create_bridge(
        &config,
        &TransformerRegistry::with_builtins(),
        ctx,
        amqp_connector(),
    )
    .await?;

    tokio::spawn(feed_stdin(events));

    info!("rabbit-bridge running, reading events from stdin");

    let reason = signals.recv().await;
    Ok(shutdown(&bridge, &reason).await.into())
}
