//! Scripted fakes shared by the integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;

use sandpilot::agent::{EventSink, StreamEvent};
use sandpilot::llm::{ChatError, ChatMessage, DeltaStream, ModelClient, StreamDelta, Tool, ToolCallFragment};
use sandpilot::sandbox::{
    FileEntry, ProcessOutput, SandboxConfig, SandboxError, SandboxHandle, SandboxProvider,
};

// ─────────────────────────────────────────────────────────────────────────────
// Sandbox
// ─────────────────────────────────────────────────────────────────────────────

/// Observable state of the fake sandbox service
#[derive(Debug, Default)]
pub struct FakeState {
    pub creates: usize,
    pub reconnects: usize,
    pub closes: usize,
    pub fail_create: bool,
    pub fail_reconnect: bool,
    pub fail_close: bool,
    pub fail_remove: bool,
    /// The next N handle operations fail with a session timeout
    pub timeouts_remaining: usize,
    /// One line per handle operation, in call order
    pub log: Vec<String>,
    pub files: BTreeMap<String, String>,
}

/// In-memory sandbox service; clones share state
#[derive(Clone, Default)]
pub struct FakeSandbox {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(&self) -> Arc<dyn SandboxProvider> {
        Arc::new(self.clone())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn log(&self) -> Vec<String> {
        self.with(|s| s.log.clone())
    }

    fn handle(&self, id: String) -> Box<dyn SandboxHandle> {
        Box::new(FakeHandle {
            id,
            working_root: SandboxConfig::default().working_root,
            state: Arc::clone(&self.state),
        })
    }
}

#[async_trait]
impl SandboxProvider for FakeSandbox {
    async fn create(&self, _config: &SandboxConfig) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        let id = self.with(|s| {
            if s.fail_create {
                return Err(SandboxError::Create("quota exceeded".into()));
            }
            s.creates += 1;
            Ok(format!("fake-{}", s.creates))
        })?;
        Ok(self.handle(id))
    }

    async fn reconnect(&self, sandbox_id: &str) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        self.with(|s| {
            s.reconnects += 1;
            if s.fail_reconnect {
                return Err(SandboxError::Reconnect {
                    id: sandbox_id.to_string(),
                    message: "sandbox is gone".into(),
                });
            }
            Ok(())
        })?;
        Ok(self.handle(sandbox_id.to_string()))
    }
}

struct FakeHandle {
    id: String,
    working_root: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeHandle {
    /// Log the operation and consume a pending timeout, if any
    fn enter(&self, op: String) -> Result<std::sync::MutexGuard<'_, FakeState>, SandboxError> {
        let mut state = self.state.lock().unwrap();
        state.log.push(op);
        if state.timeouts_remaining > 0 {
            state.timeouts_remaining -= 1;
            return Err(SandboxError::Timeout(format!("sandbox {} expired", self.id)));
        }
        Ok(state)
    }
}

#[async_trait]
impl SandboxHandle for FakeHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn working_root(&self) -> &str {
        &self.working_root
    }

    async fn run(
        &self,
        command: &str,
        cwd: Option<&str>,
        _timeout: Option<Duration>,
    ) -> Result<ProcessOutput, SandboxError> {
        let _guard = self.enter(format!("run {} @ {}", command, cwd.unwrap_or("-")))?;
        Ok(ProcessOutput {
            stdout: format!("ran: {}\n", command),
            stderr: String::new(),
            exit_code: 0,
            timed_out: false,
        })
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let state = self.enter(format!("read {}", path))?;
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| SandboxError::Remote(format!("no such file: {}", path)))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let mut state = self.enter(format!("write {}", path))?;
        state.files.insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn make_dir(&self, path: &str) -> Result<(), SandboxError> {
        let _guard = self.enter(format!("mkdir {}", path))?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), SandboxError> {
        let mut state = self.enter(format!("remove {}", path))?;
        if state.fail_remove {
            return Err(SandboxError::Remote("permission denied".into()));
        }
        state.files.remove(path);
        Ok(())
    }

    async fn list(&self, path: &str, _recursive: bool) -> Result<Vec<FileEntry>, SandboxError> {
        let _guard = self.enter(format!("list {}", path))?;
        Ok(["bin", "etc", "home"]
            .iter()
            .map(|name| FileEntry {
                name: name.to_string(),
                path: format!("/{}", name),
                is_dir: true,
                size: None,
            })
            .collect())
    }

    async fn close(&self) -> Result<(), SandboxError> {
        let mut state = self.state.lock().unwrap();
        state.closes += 1;
        if state.fail_close {
            return Err(SandboxError::Remote("close refused".into()));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model
// ─────────────────────────────────────────────────────────────────────────────

/// One scripted model call
#[derive(Debug, Clone)]
pub enum Script {
    Round(Vec<StreamDelta>),
    /// The request itself fails
    FailRequest(String),
    /// Some deltas arrive, then the stream breaks
    FailMidStream(Vec<StreamDelta>, String),
}

/// Model that replays scripted rounds and records every prompt
pub struct ScriptedModel {
    script: Mutex<VecDeque<Script>>,
    repeat: Option<Script>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    /// Plays `rounds` in order, then empty rounds
    pub fn new(rounds: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(rounds.into()),
            repeat: None,
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Plays the same round forever
    pub fn repeating(round: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(round),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[Tool],
    ) -> Result<DeltaStream, ChatError> {
        self.prompts.lock().unwrap().push(messages.to_vec());

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeat.clone())
            .unwrap_or(Script::Round(Vec::new()));

        let items: Vec<Result<StreamDelta, ChatError>> = match next {
            Script::Round(deltas) => deltas.into_iter().map(Ok).collect(),
            Script::FailRequest(message) => return Err(ChatError::Stream(message)),
            Script::FailMidStream(deltas, message) => deltas
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(ChatError::Stream(message))))
                .collect(),
        };
        Ok(Box::pin(stream::iter(items)))
    }
}

/// A round that only streams `text`, split into small chunks
pub fn text_round(text: &str) -> Script {
    let mut deltas: Vec<StreamDelta> = chunks(text, 4)
        .into_iter()
        .map(StreamDelta::Content)
        .collect();
    deltas.push(StreamDelta::Done {
        stop_reason: Some("stop".into()),
    });
    Script::Round(deltas)
}

/// A round of tool calls `(id, name, arguments)`; argument fragments of all
/// calls are interleaved to exercise accumulation by index
pub fn tool_round(calls: &[(&str, &str, &str)]) -> Script {
    let mut deltas = Vec::new();
    for (index, (id, name, _)) in calls.iter().enumerate() {
        deltas.push(StreamDelta::ToolCall(
            ToolCallFragment::new(index).with_id(*id).with_name(*name),
        ));
    }

    let pieces: Vec<Vec<String>> = calls.iter().map(|(_, _, args)| chunks(args, 5)).collect();
    let longest = pieces.iter().map(Vec::len).max().unwrap_or(0);
    for step in 0..longest {
        for (index, call_pieces) in pieces.iter().enumerate() {
            if let Some(piece) = call_pieces.get(step) {
                deltas.push(StreamDelta::ToolCall(
                    ToolCallFragment::new(index).with_arguments(piece.clone()),
                ));
            }
        }
    }

    deltas.push(StreamDelta::Done {
        stop_reason: Some("tool_calls".into()),
    });
    Script::Round(deltas)
}

fn chunks(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Records every event it receives
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StreamEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Everything except `thinking` deltas
    pub fn significant(&self) -> Vec<StreamEvent> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, StreamEvent::Thinking { .. }))
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Message { content } => Some(content),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: StreamEvent) {
        self.events.lock().unwrap().push(event);
    }
}
