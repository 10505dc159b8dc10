//! Streamed completion deltas and their accumulation
//!
//! A streamed completion arrives as a sequence of [`StreamDelta`] items:
//! text fragments, tool-call fragments keyed by their stream index, and a
//! final stop reason. [`StreamAccumulator`] folds them, in arrival order,
//! into one [`AccumulatedRound`].

use std::collections::BTreeMap;
use std::pin::Pin;

use futures_util::stream::Stream;
use uuid::Uuid;

use super::client::ChatError;
use super::types::ToolCall;

/// A single item from a streamed completion
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    /// A fragment of assistant text
    Content(String),
    /// A fragment of one tool call
    ToolCall(ToolCallFragment),
    /// The model finished; carries the server's stop reason if any
    Done { stop_reason: Option<String> },
}

/// Partial tool call as sent by the server
///
/// Every fragment carries the stream `index` of the call it belongs to.
/// The id and name normally only appear on the first fragment of an index;
/// the arguments arrive as string chunks spread over many fragments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

impl ToolCallFragment {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = Some(arguments.into());
        self
    }
}

/// Boxed stream of deltas returned by a [`super::ModelClient`]
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta, ChatError>> + Send>>;

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Collects deltas of one streamed completion
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    stop_reason: Option<String>,
}

/// Everything one streamed completion produced
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatedRound {
    /// Concatenated text, `None` if the model produced no text
    pub content: Option<String>,
    /// Finalized tool calls in stream index order
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<String>,
}

impl AccumulatedRound {
    /// Neither text nor tool calls
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.tool_calls.is_empty()
    }
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one delta in arrival order
    pub fn apply(&mut self, delta: &StreamDelta) {
        match delta {
            StreamDelta::Content(text) => self.content.push_str(text),
            StreamDelta::ToolCall(fragment) => {
                let call = self.tool_calls.entry(fragment.index).or_default();
                // id and name stick to the first fragment that carries them
                if call.id.is_none() {
                    call.id = fragment.id.clone().filter(|id| !id.is_empty());
                }
                if call.name.is_none() {
                    call.name = fragment.name.clone().filter(|name| !name.is_empty());
                }
                if let Some(arguments) = &fragment.arguments {
                    call.arguments.push_str(arguments);
                }
            }
            StreamDelta::Done { stop_reason } => {
                self.stop_reason = stop_reason.clone();
            }
        }
    }

    /// Finalize the stream into tool calls ordered by index
    ///
    /// A call whose id never arrived gets a generated one so that its result
    /// can still be correlated.
    pub fn finish(self) -> AccumulatedRound {
        let content = if self.content.is_empty() {
            None
        } else {
            Some(self.content)
        };

        let tool_calls = self
            .tool_calls
            .into_iter()
            .map(|(index, call)| {
                let id = call
                    .id
                    .unwrap_or_else(|| format!("call_{}_{}", index, Uuid::now_v7().simple()));
                ToolCall::new(id, call.name.unwrap_or_default(), call.arguments)
            })
            .collect();

        AccumulatedRound {
            content,
            tool_calls,
            stop_reason: self.stop_reason,
        }
    }
}
