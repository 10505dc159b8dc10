//! Prometheus metrics for the agent loop and sandbox sessions
//!
//! All metrics live in the default registry; [`render`] produces the text
//! exposition format for scraping or logging.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Agent Loop Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Finished turns by outcome.
    ///
    /// Labels:
    /// - outcome: "completed", "terminated", "stopped", "max_iterations" or "failed"
    pub static ref AGENT_TURNS: CounterVec = register_counter_vec!(
        "sandpilot_agent_turns_total",
        "Agent turns by outcome",
        &["outcome"]
    ).expect("failed to register AGENT_TURNS metric");

    /// Model rounds used per turn.
    pub static ref AGENT_ROUNDS: Histogram = register_histogram!(
        "sandpilot_agent_rounds",
        "Model rounds per agent turn",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 10.0, 15.0, 20.0]
    ).expect("failed to register AGENT_ROUNDS metric");

    /// Tool dispatches by tool name and result.
    ///
    /// Labels:
    /// - tool: tool name as sent by the model
    /// - status: "completed" or "error"
    pub static ref TOOL_CALLS: CounterVec = register_counter_vec!(
        "sandpilot_tool_calls_total",
        "Tool dispatches by tool and status",
        &["tool", "status"]
    ).expect("failed to register TOOL_CALLS metric");

    /// Wall time of one streamed model call, first byte to last delta.
    pub static ref LLM_CALL_TIME: HistogramVec = register_histogram_vec!(
        "sandpilot_llm_call_duration_seconds",
        "Streamed model call duration",
        &["model"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register LLM_CALL_TIME metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Sandbox Session Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Session lifecycle events.
    ///
    /// Labels:
    /// - event: "created", "resumed", "recreated", "closed" or "close_failed"
    pub static ref SANDBOX_SESSIONS: CounterVec = register_counter_vec!(
        "sandpilot_sandbox_sessions_total",
        "Sandbox session lifecycle events",
        &["event"]
    ).expect("failed to register SANDBOX_SESSIONS metric");

    /// Sandbox calls re-issued after a session timeout.
    pub static ref SANDBOX_RETRIES: Counter = register_counter!(
        "sandpilot_sandbox_retries_total",
        "Sandbox calls retried after resuming a timed-out session"
    ).expect("failed to register SANDBOX_RETRIES metric");
}

/// Text exposition of every registered metric
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
