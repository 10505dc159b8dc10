//! History Sanitizer
//!
//! Repairs a conversation whose tool calls and tool results went out of
//! step, e.g. after a transport reconnect dropped part of a round.
//!
//! Two passes over the history:
//! 1. drop every assistant message with a tool call that has no `tool`
//!    answer anywhere in the history;
//! 2. drop every `tool` message that does not answer a call of a
//!    surviving assistant message.
//!
//! Computing the referenced set from the survivors of pass 1 means one run
//! reaches the fixed point: sanitizing a sanitized history changes nothing.

use std::collections::HashSet;

use tracing::info;

use crate::llm::{ChatMessage, Role};

/// What a sanitizer run removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    pub dropped_assistant: usize,
    pub dropped_tool: usize,
}

impl SanitizeReport {
    pub fn is_clean(&self) -> bool {
        self.dropped_assistant == 0 && self.dropped_tool == 0
    }
}

/// Drop unanswered tool calls and orphaned tool results in place
///
/// Messages of other roles are never touched and relative order is kept.
pub fn sanitize_history(history: &mut Vec<ChatMessage>) -> SanitizeReport {
    let answered: HashSet<String> = history
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.clone())
        .collect();

    let before = history.len();
    history.retain(|m| {
        m.role != Role::Assistant || m.tool_calls.iter().all(|c| answered.contains(&c.id))
    });
    let dropped_assistant = before - history.len();

    let referenced: HashSet<String> = history
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .flat_map(|m| m.tool_calls.iter().map(|c| c.id.clone()))
        .collect();

    let before = history.len();
    history.retain(|m| {
        m.role != Role::Tool
            || m
                .tool_call_id
                .as_ref()
                .is_some_and(|id| referenced.contains(id))
    });
    let dropped_tool = before - history.len();

    let report = SanitizeReport {
        dropped_assistant,
        dropped_tool,
    };
    if !report.is_clean() {
        info!(
            dropped_assistant,
            dropped_tool,
            remaining = history.len(),
            "History sanitized"
        );
    }
    report
}
