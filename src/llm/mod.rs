//! Model-call capability
//!
//! This module provides the chat types exchanged with the language model,
//! the streamed delta types, and a client for OpenAI-compatible
//! `/chat/completions` endpoints (Ollama exposes one under `/v1`).
//!
//! The agent loop only depends on the [`ModelClient`] trait: given the full
//! message history and the tool schemas, it returns a stream of
//! [`StreamDelta`] items that the [`StreamAccumulator`] folds into one
//! assistant turn.

pub mod client;
pub mod stream;
pub mod types;

pub use client::{ChatClient, ChatError, ModelClient};
pub use stream::{AccumulatedRound, DeltaStream, StreamAccumulator, StreamDelta, ToolCallFragment};
pub use types::{ChatMessage, FunctionCall, Role, Tool, ToolCall, ToolFunction};
