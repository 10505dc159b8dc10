//! Tool Dispatcher
//!
//! Maps one model tool call onto exactly one session operation, wrapped in
//! the timeout-retry policy, and reports it through the event sink.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info_span, warn, Instrument};

use super::schema::{CODE_EXECUTION_TOOL, FILE_OPERATION_TOOL, SHELL_COMMAND_TOOL, TERMINATE_TOOL};
use super::{ToolError, ToolOutput, ToolResult};
use crate::agent::{EventSink, StreamEvent};
use crate::llm::ToolCall;
use crate::metrics::{SANDBOX_RETRIES, TOOL_CALLS};
use crate::sandbox::{FileOperation, SandboxError, SandboxOutput, SandboxRequest, SessionManager};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShellArgs {
    command: String,
    #[serde(default)]
    working_directory: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CodeArgs {
    language: String,
    code: String,
    /// Seconds
    #[serde(default)]
    timeout: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TerminateArgs {
    reason: String,
    #[serde(default)]
    summary: Option<String>,
}

fn parse_args<T: DeserializeOwned>(call: &ToolCall) -> Result<T, ToolError> {
    let args = call.parse_arguments()?;
    Ok(serde_json::from_value(Value::Object(args))?)
}

/// Run `request`; on a session timeout resume the session and run it once more
///
/// The retried outcome is final, as is a failure to resume. No other error
/// is retried.
pub async fn perform_with_retry(
    session: &mut SessionManager,
    request: &SandboxRequest,
) -> Result<SandboxOutput, SandboxError> {
    let first = session.perform(request).await;
    match first {
        Err(e) if e.is_timeout() => {
            warn!(error = %e, "Sandbox session timed out, resuming and retrying once");
            session.resume_session().await?;
            SANDBOX_RETRIES.inc();
            session.perform(request).await
        }
        other => other,
    }
}

/// Executes model tool calls against a sandbox session
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    /// Applied when the model gives no timeout
    default_timeout: Duration,
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ToolDispatcher {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    /// Dispatch one tool call, emitting `running` and then `completed` or
    /// `error`
    ///
    /// Every failure is captured in the returned [`ToolResult`].
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        session: &mut SessionManager,
        sink: &dyn EventSink,
    ) -> ToolResult {
        let input = match call.parse_arguments() {
            Ok(args) => Value::Object(args),
            Err(_) => Value::String(call.function.arguments.clone()),
        };
        sink.emit(StreamEvent::tool_running(&call.id, call.name(), input.clone()));

        let span = info_span!(
            "tool_dispatch",
            tool = %call.name(),
            call_id = %call.id,
            otel.name = "tool_dispatch"
        );
        let result: ToolResult = self.execute(call, session).instrument(span).await.into();

        match &result {
            ToolResult::Success(_) => {
                TOOL_CALLS.with_label_values(&[call.name(), "completed"]).inc();
                debug!(tool = call.name(), call_id = %call.id, "Tool call completed");
                sink.emit(StreamEvent::tool_completed(
                    &call.id,
                    call.name(),
                    input,
                    result.to_value(),
                ));
            }
            ToolResult::Failure { kind, message } => {
                TOOL_CALLS.with_label_values(&[call.name(), "error"]).inc();
                warn!(tool = call.name(), call_id = %call.id, kind = %kind, error = %message, "Tool call failed");
                sink.emit(StreamEvent::tool_failed(&call.id, call.name(), input, message));
            }
        }

        result
    }

    async fn execute(
        &self,
        call: &ToolCall,
        session: &mut SessionManager,
    ) -> Result<ToolOutput, ToolError> {
        let request = match call.name() {
            TERMINATE_TOOL => {
                let args: TerminateArgs = parse_args(call)?;
                return Ok(ToolOutput::terminated(args.reason, args.summary));
            }
            name => self.request_for(name, call)?,
        };

        let output = perform_with_retry(session, &request).await?;
        Ok(ToolOutput::Sandbox(output))
    }

    /// Translate a sandbox tool call into the request it performs
    ///
    /// Shell commands carry no timeout and run until the process exits.
    fn request_for(&self, name: &str, call: &ToolCall) -> Result<SandboxRequest, ToolError> {
        let request = match name {
            SHELL_COMMAND_TOOL => {
                let args: ShellArgs = parse_args(call)?;
                SandboxRequest::Command {
                    command: args.command,
                    cwd: args.working_directory,
                    timeout: None,
                }
            }
            FILE_OPERATION_TOOL => SandboxRequest::File(parse_args::<FileOperation>(call)?),
            CODE_EXECUTION_TOOL => {
                let args: CodeArgs = parse_args(call)?;
                SandboxRequest::Code {
                    language: args.language,
                    code: args.code,
                    timeout: Some(self.code_timeout(args.timeout)),
                }
            }
            other => return Err(ToolError::UnknownTool(other.to_string())),
        };
        Ok(request)
    }

    fn code_timeout(&self, requested: Option<f64>) -> Duration {
        match requested {
            Some(secs) if secs > 0.0 => {
                Duration::try_from_secs_f64(secs).unwrap_or(self.default_timeout)
            }
            _ => self.default_timeout,
        }
    }
}
