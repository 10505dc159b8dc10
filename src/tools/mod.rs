//! Model-facing tools
//!
//! The model sees exactly four tools:
//!
//! | Tool | Effect |
//! |---|---|
//! | `shell_command` | run a shell command in the sandbox |
//! | `file_operation` | read, write, create, delete or list sandbox paths |
//! | `code_execution` | run a Python, JavaScript or Bash snippet |
//! | `terminate` | end the turn, handled locally |
//!
//! [`ToolDispatcher`] executes a [`ToolCall`](crate::llm::ToolCall) against a
//! [`SessionManager`](crate::sandbox::SessionManager) and always produces a
//! [`ToolResult`], never an error.

pub mod dispatcher;
pub mod schema;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::sandbox::{SandboxError, SandboxOutput};

pub use dispatcher::{perform_with_retry, ToolDispatcher};
pub use schema::{definitions, DEFAULT_SYSTEM_PROMPT, TERMINATE_TOOL};

/// Why a tool call could not produce an output
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::InvalidArguments(_) => "invalid_arguments",
            ToolError::Sandbox(e) => e.kind(),
        }
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::InvalidArguments(e.to_string())
    }
}

/// Successful output of a tool call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Sandbox(SandboxOutput),
    Terminated {
        terminated: bool,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
}

impl ToolOutput {
    pub fn terminated(reason: impl Into<String>, summary: Option<String>) -> Self {
        ToolOutput::Terminated {
            terminated: true,
            reason: reason.into(),
            summary,
        }
    }
}

/// Outcome of one dispatched tool call
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Success(ToolOutput),
    Failure { kind: String, message: String },
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success(_))
    }

    /// The summary of a successful `terminate`, `Some(None)` when it had none
    pub fn termination(&self) -> Option<Option<&str>> {
        match self {
            ToolResult::Success(ToolOutput::Terminated { summary, .. }) => {
                Some(summary.as_deref())
            }
            _ => None,
        }
    }

    /// JSON value carried by the result
    pub fn to_value(&self) -> Value {
        match self {
            ToolResult::Success(output) => {
                serde_json::to_value(output).unwrap_or_else(|e| json!({"error": e.to_string()}))
            }
            ToolResult::Failure { kind, message } => json!({"error": message, "kind": kind}),
        }
    }

    /// Content of the `tool` message fed back to the model
    pub fn to_content(&self) -> String {
        self.to_value().to_string()
    }
}

impl From<Result<ToolOutput, ToolError>> for ToolResult {
    fn from(result: Result<ToolOutput, ToolError>) -> Self {
        match result {
            Ok(output) => ToolResult::Success(output),
            Err(e) => ToolResult::Failure {
                kind: e.kind().to_string(),
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ProcessOutput;

    #[test]
    fn test_termination_serializes_without_missing_summary() {
        let result = ToolResult::Success(ToolOutput::terminated("done", None));
        assert_eq!(result.to_value(), json!({"terminated": true, "reason": "done"}));
        assert_eq!(result.termination(), Some(None));

        let result = ToolResult::Success(ToolOutput::terminated("done", Some("All set".into())));
        assert_eq!(result.termination(), Some(Some("All set")));
    }

    #[test]
    fn test_failure_content_carries_kind() {
        let result: ToolResult = Err(ToolError::UnknownTool("fly".into())).into();
        assert!(!result.is_success());
        assert!(result.termination().is_none());
        assert_eq!(
            result.to_value(),
            json!({"error": "unknown tool: fly", "kind": "unknown_tool"})
        );
    }

    #[test]
    fn test_process_output_content() {
        let output = ProcessOutput {
            stdout: "hi\n".into(),
            exit_code: 0,
            ..Default::default()
        };
        let result = ToolResult::Success(ToolOutput::Sandbox(SandboxOutput::Process(output)));
        assert_eq!(
            result.to_value(),
            json!({"stdout": "hi\n", "stderr": "", "exitCode": 0, "timedOut": false})
        );
    }
}
