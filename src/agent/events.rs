//! Outbound events of a running turn
//!
//! Events are emitted in order through an [`EventSink`]. The sink is only
//! an emitter; delivery and buffering are the sink's business.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Lifecycle of one tool call as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Running,
    Completed,
    Error,
}

/// One observable step of a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Model text as it streams in
    Thinking { content: String },
    ToolCall {
        id: String,
        name: String,
        status: ToolCallStatus,
        /// Parsed arguments, or the raw argument string when unparsable
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Final text of a turn
    Message { content: String },
    Error { message: String },
}

impl StreamEvent {
    pub fn thinking(content: impl Into<String>) -> Self {
        StreamEvent::Thinking {
            content: content.into(),
        }
    }

    pub fn message(content: impl Into<String>) -> Self {
        StreamEvent::Message {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }

    pub fn tool_running(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        StreamEvent::ToolCall {
            id: id.into(),
            name: name.into(),
            status: ToolCallStatus::Running,
            input,
            output: None,
            error: None,
        }
    }

    pub fn tool_completed(
        id: impl Into<String>,
        name: impl Into<String>,
        input: Value,
        output: Value,
    ) -> Self {
        StreamEvent::ToolCall {
            id: id.into(),
            name: name.into(),
            status: ToolCallStatus::Completed,
            input,
            output: Some(output),
            error: None,
        }
    }

    pub fn tool_failed(
        id: impl Into<String>,
        name: impl Into<String>,
        input: Value,
        error: impl Into<String>,
    ) -> Self {
        StreamEvent::ToolCall {
            id: id.into(),
            name: name.into(),
            status: ToolCallStatus::Error,
            input,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Receives the events of a turn
pub trait EventSink: Send + Sync {
    fn emit(&self, event: StreamEvent);
}

impl EventSink for mpsc::UnboundedSender<StreamEvent> {
    fn emit(&self, event: StreamEvent) {
        // a dropped receiver means nobody is listening anymore
        let _ = self.send(event);
    }
}

/// Adapts a closure into an [`EventSink`]
pub struct CallbackSink<F>(pub F);

impl<F> EventSink for CallbackSink<F>
where
    F: Fn(StreamEvent) + Send + Sync,
{
    fn emit(&self, event: StreamEvent) {
        (self.0)(event)
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: StreamEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event = StreamEvent::tool_running("call_1", "shell_command", json!({"command": "ls"}));
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(
            wire,
            json!({
                "type": "tool_call",
                "id": "call_1",
                "name": "shell_command",
                "status": "running",
                "input": {"command": "ls"}
            })
        );

        let wire = serde_json::to_value(StreamEvent::message("done")).unwrap();
        assert_eq!(wire, json!({"type": "message", "content": "done"}));
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.emit(StreamEvent::thinking("a"));
        tx.emit(StreamEvent::message("b"));
        drop(tx);

        assert_eq!(rx.recv().await, Some(StreamEvent::thinking("a")));
        assert_eq!(rx.recv().await, Some(StreamEvent::message("b")));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_channel_sink_ignores_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        tx.emit(StreamEvent::error("nobody listens"));
    }
}
