//! sandpilot - JSON-lines driver for the sandbox agent
//!
//! Reads one control message per stdin line:
//!
//! ```text
//! {"type":"chat","message":"list files in /"}
//! {"type":"stop"} | {"type":"reset"} | {"type":"sanitize"}
//! ```
//!
//! and writes one event per stdout line. Logs go to stderr.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use sandpilot::agent::{spawn_driver, AgentLoop, ControlMessage, EventSink, StreamEvent};
use sandpilot::config::AppConfig;
use sandpilot::sandbox::SessionManager;
use sandpilot::tracing::{init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = AppConfig::from_env()?;
    init_tracing("sandpilot", config.otlp_endpoint.as_deref())?;

    info!(
        model = %config.agent.model,
        model_url = %config.model_url,
        backend = ?config.backend,
        max_iterations = config.agent.max_iterations,
        "Starting sandpilot"
    );

    let session = SessionManager::new(config.sandbox_provider(), config.sandbox.clone());
    let agent = AgentLoop::new(config.model_client(), session, config.agent.clone());

    // stdout writer; one JSON event per line
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<StreamEvent>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = event_rx.recv().await {
            let mut line = match serde_json::to_string(&event) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize event");
                    continue;
                }
            };
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                warn!("stdout closed, dropping remaining events");
                break;
            }
        }
    });

    let sink: Arc<dyn EventSink> = Arc::new(event_tx.clone());
    let (router, driver) = spawn_driver(agent, sink);

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    while let Some(line) = lines.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<ControlMessage>(&line) {
            Ok(message) => {
                debug!(?message, "Control message received");
                if router.route(message).is_err() {
                    warn!("Agent driver exited early");
                    break;
                }
            }
            Err(e) => event_tx.emit(StreamEvent::error(format!("Invalid control message: {}", e))),
        }
    }

    info!("Input closed, finishing queued work");
    drop(router);
    let agent = driver.await?;
    debug!(history_len = agent.history().len(), "Agent driver finished");
    drop(agent);

    drop(event_tx);
    writer.await?;

    debug!(metrics = %sandpilot::metrics::render(), "Final metrics");
    shutdown_tracing();
    Ok(())
}
