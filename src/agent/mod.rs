//! Agent module for LLM-driven sandbox work
//!
//! This module provides the agent loop that orchestrates:
//! - Streaming model calls with tool definitions
//! - Sequential tool dispatch against one sandbox session
//! - History repair and control-message handling
//!
//! # Architecture
//!
//! ```text
//! ControlMessage → ControlRouter ─stop─► AgentControl
//!                        │ queue
//!                        ▼
//!               run_driver → AgentLoop.run_turn()
//!                                 ↓
//!                 ModelClient.stream_chat() → StreamAccumulator
//!                                 ↓
//!                 ToolDispatcher → SessionManager → sandbox
//!                                 ↓
//!                 tool results → history → next round or Idle
//! ```
//!
//! Every step is reported to the caller as a [`StreamEvent`].

pub mod controller;
pub mod driver;
pub mod events;
pub mod history;

pub use controller::{AgentConfig, AgentControl, AgentLoop, AgentState, TurnOutcome, STOPPED_MESSAGE};
pub use driver::{run_driver, spawn_driver, ControlMessage, ControlRouter};
pub use events::{CallbackSink, EventSink, NullSink, StreamEvent, ToolCallStatus};
pub use history::{sanitize_history, SanitizeReport};
