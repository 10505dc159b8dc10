//! Agent Loop - orchestration of model rounds and tool dispatch
//!
//! One [`AgentLoop`] owns one conversation: its history, its sandbox
//! session and its tool dispatcher. A turn runs rounds until the model
//! answers without tools, calls `terminate`, is stopped, or hits the
//! iteration cap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::events::{EventSink, StreamEvent};
use super::history::{sanitize_history, SanitizeReport};
use crate::llm::{AccumulatedRound, ChatError, ChatMessage, ModelClient, StreamAccumulator, StreamDelta, Tool};
use crate::metrics::{AGENT_ROUNDS, AGENT_TURNS, LLM_CALL_TIME};
use crate::sandbox::SessionManager;
use crate::tools::{definitions, ToolDispatcher, DEFAULT_SYSTEM_PROMPT};

/// Message emitted when a turn is stopped by the user
pub const STOPPED_MESSAGE: &str = "Stopped by user.";

/// Configuration for the agent loop
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model name, used for spans and metrics
    pub model: String,
    /// Maximum number of rounds (model calls) per turn
    pub max_iterations: usize,
    /// Default timeout for code execution in seconds
    pub code_timeout_secs: u64,
    /// Custom system prompt (uses default if None)
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "qwen3".to_string(),
            max_iterations: 10,
            code_timeout_secs: 30,
            system_prompt: None,
        }
    }
}

/// Where the loop is in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Running,
    Terminating,
    Stopped,
    MaxIterationsReached,
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered without calling tools
    Completed,
    /// The model called `terminate`, or produced an empty round
    Terminated,
    Stopped,
    MaxIterationsReached,
    /// The session could not be started or the model call failed
    Failed,
}

impl TurnOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnOutcome::Completed => "completed",
            TurnOutcome::Terminated => "terminated",
            TurnOutcome::Stopped => "stopped",
            TurnOutcome::MaxIterationsReached => "max_iterations",
            TurnOutcome::Failed => "failed",
        }
    }
}

/// Cloneable handle for interacting with a running turn
///
/// `stop` is the only interaction permitted while a turn runs. It is
/// sampled at the top of every round, so an in-flight model stream or tool
/// call always finishes first.
#[derive(Debug, Clone, Default)]
pub struct AgentControl {
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl AgentControl {
    /// Request a cooperative stop; ignored (returns false) when idle
    pub fn stop(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.stop.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn begin(&self) {
        self.stop.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop.store(false, Ordering::SeqCst);
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Agent Loop owning one conversation
pub struct AgentLoop {
    model: Arc<dyn ModelClient>,
    session: SessionManager,
    dispatcher: ToolDispatcher,
    config: AgentConfig,
    tools: Vec<Tool>,
    history: Vec<ChatMessage>,
    state: AgentState,
    control: AgentControl,
}

impl AgentLoop {
    /// Create a new agent loop
    ///
    /// # Arguments
    /// * `model` - Streaming model client
    /// * `session` - Sandbox session manager, owned exclusively by this loop
    /// * `config` - Agent configuration
    pub fn new(model: Arc<dyn ModelClient>, session: SessionManager, config: AgentConfig) -> Self {
        Self {
            model,
            session,
            dispatcher: ToolDispatcher::new(Duration::from_secs(config.code_timeout_secs)),
            config,
            tools: definitions(),
            history: Vec::new(),
            state: AgentState::Idle,
            control: AgentControl::default(),
        }
    }

    pub fn control(&self) -> AgentControl {
        self.control.clone()
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Conversation so far, without the system prompt
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Run one turn for `user_message`, emitting events to `sink`
    ///
    /// Never fails: every error ends up as an `error` event and
    /// [`TurnOutcome::Failed`]. The loop is back to `Idle` on return.
    pub async fn run_turn(&mut self, user_message: &str, sink: &dyn EventSink) -> TurnOutcome {
        let trace_id = Uuid::now_v7().to_string();
        let span = info_span!(
            "agent_turn",
            trace_id = %trace_id,
            model = %self.config.model,
            otel.name = "agent_turn"
        );

        self.control.begin();
        self.state = AgentState::Running;

        let (outcome, rounds) = self
            .turn(user_message, sink, &trace_id)
            .instrument(span)
            .await;

        self.control.finish();
        self.state = AgentState::Idle;

        AGENT_TURNS.with_label_values(&[outcome.as_str()]).inc();
        AGENT_ROUNDS.observe(rounds as f64);
        info!(trace_id = %trace_id, outcome = outcome.as_str(), rounds, "Agent turn finished");

        outcome
    }

    async fn turn(
        &mut self,
        user_message: &str,
        sink: &dyn EventSink,
        trace_id: &str,
    ) -> (TurnOutcome, usize) {
        info!(trace_id, "Starting agent turn");

        if let Err(e) = self.session.ensure_session().await {
            error!(trace_id, error = %e, "Could not start sandbox session");
            sink.emit(StreamEvent::error(format!("Failed to start sandbox session: {}", e)));
            return (TurnOutcome::Failed, 0);
        }
        self.history.push(ChatMessage::user(user_message));

        let mut rounds = 0;
        loop {
            if self.control.stop_requested() {
                self.state = AgentState::Stopped;
                info!(trace_id, rounds, "Turn stopped by user");
                sink.emit(StreamEvent::message(STOPPED_MESSAGE));
                return (TurnOutcome::Stopped, rounds);
            }

            if rounds >= self.config.max_iterations {
                self.state = AgentState::MaxIterationsReached;
                warn!(trace_id, rounds, "Max iterations reached");
                sink.emit(StreamEvent::message(format!(
                    "Reached maximum iterations ({}) without completing the task.",
                    self.config.max_iterations
                )));
                return (TurnOutcome::MaxIterationsReached, rounds);
            }
            rounds += 1;

            let round = match self.stream_round(sink, trace_id, rounds).await {
                Ok(round) => round,
                Err(e) => {
                    error!(trace_id, round = rounds, error = %e, "Model call failed");
                    sink.emit(StreamEvent::error(format!("Model call failed: {}", e)));
                    return (TurnOutcome::Failed, rounds);
                }
            };

            if round.is_empty() {
                // nothing left to act on
                self.state = AgentState::Terminating;
                info!(trace_id, round = rounds, "Empty round, ending turn");
                return (TurnOutcome::Terminated, rounds);
            }

            let AccumulatedRound {
                content,
                tool_calls,
                stop_reason,
            } = round;
            debug!(
                trace_id,
                round = rounds,
                tool_calls = tool_calls.len(),
                stop_reason = stop_reason.as_deref().unwrap_or(""),
                "Round streamed"
            );
            self.history.push(ChatMessage::assistant_with_tools(
                content.clone(),
                tool_calls.clone(),
            ));

            if tool_calls.is_empty() {
                sink.emit(StreamEvent::message(content.unwrap_or_default()));
                return (TurnOutcome::Completed, rounds);
            }

            // every call gets its result, even after a terminate in the same batch
            let mut termination: Option<Option<String>> = None;
            for call in &tool_calls {
                let result = self.dispatcher.dispatch(call, &mut self.session, sink).await;
                if termination.is_none() {
                    termination = result.termination().map(|s| s.map(str::to_string));
                }
                self.history
                    .push(ChatMessage::tool(call.id.clone(), result.to_content()));
            }

            if let Some(summary) = termination {
                self.state = AgentState::Terminating;
                info!(trace_id, round = rounds, "Model terminated the task");
                let final_text = content.filter(|c| !c.trim().is_empty()).or(summary);
                if let Some(text) = final_text {
                    sink.emit(StreamEvent::message(text));
                }
                return (TurnOutcome::Terminated, rounds);
            }
        }
    }

    /// One streamed model call; content deltas are forwarded as `thinking`
    async fn stream_round(
        &self,
        sink: &dyn EventSink,
        trace_id: &str,
        round: usize,
    ) -> Result<AccumulatedRound, ChatError> {
        let span = info_span!(
            "llm_call",
            trace_id = %trace_id,
            round,
            model = %self.config.model,
            otel.name = "llm_call"
        );

        async {
            let prompt = self.prompt();
            let start = Instant::now();

            let mut stream = self.model.stream_chat(&prompt, &self.tools).await?;
            let mut accumulator = StreamAccumulator::new();
            while let Some(delta) = stream.next().await {
                let delta = delta?;
                if let StreamDelta::Content(text) = &delta {
                    if !text.is_empty() {
                        sink.emit(StreamEvent::thinking(text.clone()));
                    }
                }
                accumulator.apply(&delta);
            }

            let elapsed = start.elapsed();
            LLM_CALL_TIME
                .with_label_values(&[&self.config.model])
                .observe(elapsed.as_secs_f64());
            debug!(
                trace_id,
                round,
                duration_ms = elapsed.as_millis() as u64,
                "LLM call completed"
            );

            Ok(accumulator.finish())
        }
        .instrument(span)
        .await
    }

    /// System prompt followed by the full history
    fn prompt(&self) -> Vec<ChatMessage> {
        let system = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);

        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(ChatMessage::system(system));
        messages.extend(self.history.iter().cloned());
        messages
    }

    /// Clear the history and close the sandbox session
    pub async fn reset(&mut self) {
        let dropped = self.history.len();
        self.history.clear();
        self.session.close_session().await;
        info!(dropped_messages = dropped, "Conversation reset");
    }

    /// Repair tool call / tool result pairing in the history
    pub fn sanitize(&mut self) -> SanitizeReport {
        sanitize_history(&mut self.history)
    }

    /// Release the sandbox; the history is kept
    pub async fn shutdown(&mut self) {
        self.session.close_session().await;
    }
}

impl std::fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoop")
            .field("state", &self.state)
            .field("history_len", &self.history.len())
            .field("session", &self.session)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_ignored_while_idle() {
        let control = AgentControl::default();
        assert!(!control.stop());
        assert!(!control.stop_requested());

        control.begin();
        assert!(control.is_running());
        assert!(control.stop());
        assert!(control.stop_requested());

        control.finish();
        assert!(!control.is_running());
        assert!(!control.stop_requested());
    }

    #[test]
    fn test_stop_left_over_from_previous_turn_is_cleared() {
        let control = AgentControl::default();
        control.begin();
        control.stop();
        control.finish();

        control.begin();
        assert!(!control.stop_requested());
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(TurnOutcome::MaxIterationsReached.as_str(), "max_iterations");
        assert_eq!(TurnOutcome::Failed.as_str(), "failed");
    }

    #[test]
    fn test_agent_config_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.model, "qwen3");
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.code_timeout_secs, 30);
        assert!(config.system_prompt.is_none());
    }
}
