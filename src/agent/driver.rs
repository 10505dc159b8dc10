//! Control-message driver
//!
//! Inbound control messages arrive asynchronously relative to a running
//! turn. `stop` goes straight to the [`AgentControl`]; everything else is
//! queued and applied one at a time, so a `reset` or `sanitize` sent during
//! a turn takes effect once the loop is back to `Idle`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::controller::{AgentControl, AgentLoop};
use super::events::EventSink;

/// A request from the caller's transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Chat { message: String },
    Reset,
    Sanitize,
    Stop,
}

/// Routes control messages to a driver task
#[derive(Debug, Clone)]
pub struct ControlRouter {
    control: AgentControl,
    queue: mpsc::UnboundedSender<ControlMessage>,
}

impl ControlRouter {
    pub fn new(control: AgentControl, queue: mpsc::UnboundedSender<ControlMessage>) -> Self {
        Self { control, queue }
    }

    /// Deliver one message
    ///
    /// Fails only when the driver has exited; the message is handed back.
    pub fn route(
        &self,
        message: ControlMessage,
    ) -> Result<(), mpsc::error::SendError<ControlMessage>> {
        if message == ControlMessage::Stop {
            if !self.control.stop() {
                debug!("Stop received while idle, ignoring");
            }
            return Ok(());
        }
        self.queue.send(message)
    }

    pub fn control(&self) -> &AgentControl {
        &self.control
    }
}

/// Apply queued messages to `agent` until every router is dropped
///
/// The session is shut down before the agent is handed back.
pub async fn run_driver(
    mut agent: AgentLoop,
    mut queue: mpsc::UnboundedReceiver<ControlMessage>,
    sink: Arc<dyn EventSink>,
) -> AgentLoop {
    while let Some(message) = queue.recv().await {
        match message {
            ControlMessage::Chat { message } => {
                agent.run_turn(&message, sink.as_ref()).await;
            }
            ControlMessage::Reset => agent.reset().await,
            ControlMessage::Sanitize => {
                let report = agent.sanitize();
                debug!(
                    dropped_assistant = report.dropped_assistant,
                    dropped_tool = report.dropped_tool,
                    "Sanitize applied"
                );
            }
            // only reaches the queue when sent past the router
            ControlMessage::Stop => {
                agent.control().stop();
            }
        }
    }

    info!("Control queue closed, shutting down agent");
    agent.shutdown().await;
    agent
}

/// Spawn [`run_driver`] on the runtime and return its router
pub fn spawn_driver(
    agent: AgentLoop,
    sink: Arc<dyn EventSink>,
) -> (ControlRouter, JoinHandle<AgentLoop>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let router = ControlRouter::new(agent.control(), tx);
    let handle = tokio::spawn(run_driver(agent, rx, sink));
    (router, handle)
}
