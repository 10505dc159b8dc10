//! sandpilot - streaming LLM agent driving a remote execution sandbox
//!
//! This library runs a tool-calling conversation against an
//! OpenAI-compatible model and executes the requested tools inside a
//! sandbox that may expire between calls.
//!
//! # Modules
//!
//! - `llm` - chat types, streamed deltas and the streaming model client
//! - `sandbox` - sandbox session lifecycle, path normalisation, backends
//! - `tools` - tool schemas, dispatcher and timeout-retry policy
//! - `agent` - agent loop, events, history sanitizer, control driver
//! - `config` - environment configuration
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - logging and OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use sandpilot::{AgentConfig, AgentLoop, ChatClient, LocalSandboxProvider, SandboxConfig, SessionManager};
//!
//! let model = Arc::new(ChatClient::new("http://localhost:11434/v1", "qwen3"));
//! let provider = Arc::new(LocalSandboxProvider::new("/tmp/sandpilot"));
//! let session = SessionManager::new(provider, SandboxConfig::default());
//!
//! let mut agent = AgentLoop::new(model, session, AgentConfig::default());
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! agent.run_turn("list files in /", &tx).await;
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod metrics;
pub mod sandbox;
pub mod tools;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentConfig, AgentControl, AgentLoop, EventSink, StreamEvent, TurnOutcome};
pub use llm::{ChatClient, ChatMessage, ModelClient, ToolCall};
pub use sandbox::{
    HttpSandboxProvider, LocalSandboxProvider, SandboxConfig, SandboxError, SessionManager,
};
pub use tools::{ToolDispatcher, ToolResult};
