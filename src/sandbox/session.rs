//! Sandbox Session Manager
//!
//! Owns at most one live sandbox and exposes typed operations on it. The
//! manager knows nothing about conversations or models; it only tracks
//! whether a session is `Absent` or `Active` and which id it holds.
//!
//! Stale sessions are not detected here: an operation on an expired sandbox
//! fails with [`SandboxError::Timeout`] and the caller decides whether to
//! [`SessionManager::resume_session`] and retry.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::SandboxError;
use super::provider::{FileEntry, ProcessOutput, SandboxConfig, SandboxHandle, SandboxProvider};
use crate::metrics::SANDBOX_SESSIONS;

/// Directory inside the sandbox that holds code files for `execute_code`
const CODE_TMP_DIR: &str = "/tmp";

/// Whether the manager currently holds a sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Absent,
    Active,
}

/// A file operation as requested by the model
///
/// `op_type` stays a string so that unknown operations can be reported
/// instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOperation {
    #[serde(rename = "type")]
    pub op_type: String,
    pub path: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub recursive: bool,
}

impl FileOperation {
    fn new(op_type: &str, path: impl Into<String>) -> Self {
        Self {
            op_type: op_type.to_string(),
            path: path.into(),
            content: None,
            recursive: false,
        }
    }

    pub fn read(path: impl Into<String>) -> Self {
        Self::new("read", path)
    }

    pub fn write(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::new("write", path)
        }
    }

    /// Creates a directory when `path` ends with `/`, a file otherwise
    pub fn create(path: impl Into<String>) -> Self {
        Self::new("create", path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new("delete", path)
    }

    pub fn list(path: impl Into<String>) -> Self {
        Self::new("list", path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOpKind {
    Read,
    Write,
    Create,
    Delete,
    List,
}

impl FileOpKind {
    fn parse(op_type: &str) -> Result<Self, SandboxError> {
        match op_type {
            "read" => Ok(FileOpKind::Read),
            "write" => Ok(FileOpKind::Write),
            "create" => Ok(FileOpKind::Create),
            "delete" => Ok(FileOpKind::Delete),
            "list" => Ok(FileOpKind::List),
            other => Err(SandboxError::UnknownOperation(other.to_string())),
        }
    }
}

/// Interpreters available to `execute_code`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeLanguage {
    Python,
    JavaScript,
    Bash,
}

impl CodeLanguage {
    pub fn parse(language: &str) -> Result<Self, SandboxError> {
        match language.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" => Ok(CodeLanguage::Python),
            "javascript" | "js" | "node" => Ok(CodeLanguage::JavaScript),
            "bash" | "sh" | "shell" => Ok(CodeLanguage::Bash),
            _ => Err(SandboxError::UnsupportedLanguage(language.to_string())),
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            CodeLanguage::Python => "py",
            CodeLanguage::JavaScript => "js",
            CodeLanguage::Bash => "sh",
        }
    }

    /// Shell command that runs the code file at `file`
    pub fn launch_command(&self, file: &str) -> String {
        match self {
            CodeLanguage::Python => format!("python3 {}", file),
            CodeLanguage::JavaScript => format!("node {}", file),
            CodeLanguage::Bash => format!("chmod +x {} && {}", file, file),
        }
    }
}

/// Fresh code file path; UUID v7 keeps names unique within one millisecond
fn temp_code_path(language: CodeLanguage) -> String {
    format!(
        "{}/sandpilot_exec_{}.{}",
        CODE_TMP_DIR,
        Uuid::now_v7().simple(),
        language.extension()
    )
}

/// One typed sandbox call, replayable by the retry policy
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxRequest {
    Command {
        command: String,
        cwd: Option<String>,
        timeout: Option<Duration>,
    },
    File(FileOperation),
    Code {
        language: String,
        code: String,
        timeout: Option<Duration>,
    },
}

/// Result of a sandbox call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SandboxOutput {
    Process(ProcessOutput),
    FileContent {
        path: String,
        content: String,
    },
    Written {
        path: String,
        #[serde(rename = "bytesWritten")]
        bytes_written: usize,
    },
    Created {
        path: String,
        #[serde(rename = "isDir")]
        is_dir: bool,
    },
    Deleted {
        path: String,
        deleted: bool,
    },
    Listing {
        path: String,
        entries: Vec<FileEntry>,
    },
}

/// Rewrite a model-supplied path onto the sandbox working root
///
/// Absolute paths pass through. Exactly one leading `./` or `../` is
/// stripped and the rest is appended to the root; bare relative paths are
/// appended as-is. Deeper `..` segments are left alone, this is not a
/// general path resolver.
pub fn normalize_path(working_root: &str, path: &str) -> String {
    if path.starts_with('/') {
        return path.to_string();
    }

    let root = working_root.trim_end_matches('/');
    let relative = path
        .strip_prefix("./")
        .or_else(|| path.strip_prefix("../"))
        .unwrap_or(path);
    let relative = match relative {
        "." | ".." => "",
        other => other,
    };

    match (root.is_empty(), relative.is_empty()) {
        (true, true) => "/".to_string(),
        (false, true) => root.to_string(),
        _ => format!("{}/{}", root, relative),
    }
}

/// Owns one sandbox session
pub struct SessionManager {
    provider: Arc<dyn SandboxProvider>,
    config: SandboxConfig,
    active: Option<Box<dyn SandboxHandle>>,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn SandboxProvider>, config: SandboxConfig) -> Self {
        Self {
            provider,
            config,
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.active.is_some() {
            SessionState::Active
        } else {
            SessionState::Absent
        }
    }

    /// Id of the held session, possibly stale
    pub fn session_id(&self) -> Option<&str> {
        self.active.as_deref().map(|h| h.id())
    }

    pub fn working_root(&self) -> &str {
        match &self.active {
            Some(handle) => handle.working_root(),
            None => &self.config.working_root,
        }
    }

    fn handle(&self) -> Result<&dyn SandboxHandle, SandboxError> {
        self.active.as_deref().ok_or(SandboxError::NoActiveSession)
    }

    /// Return the active session id, creating a sandbox if there is none
    pub async fn ensure_session(&mut self) -> Result<String, SandboxError> {
        if let Some(handle) = &self.active {
            return Ok(handle.id().to_string());
        }
        self.create_session().await
    }

    /// Create a fresh sandbox
    ///
    /// A previously held session is dropped without being closed; call
    /// [`Self::close_session`] first for a clean teardown. On failure the
    /// previous reference is kept.
    pub async fn create_session(&mut self) -> Result<String, SandboxError> {
        let handle = self
            .provider
            .create(&self.config)
            .await
            .map_err(|e| match e {
                SandboxError::Create(_) => e,
                other => SandboxError::Create(other.to_string()),
            })?;

        let id = handle.id().to_string();
        if let Some(prior) = self.active.replace(handle) {
            debug!(prior_id = prior.id(), "Dropping prior sandbox reference without closing it");
        }

        SANDBOX_SESSIONS.with_label_values(&["created"]).inc();
        info!(sandbox_id = %id, "Sandbox session created");
        Ok(id)
    }

    /// Reattach to the held session id, recreating the sandbox if that fails
    ///
    /// Returns `Ok(None)` without side effects when no id is held. The only
    /// error surfaced is a failure of the fallback create.
    pub async fn resume_session(&mut self) -> Result<Option<String>, SandboxError> {
        let stale_id = match self.session_id() {
            Some(id) => id.to_string(),
            None => return Ok(None),
        };

        match self.provider.reconnect(&stale_id).await {
            Ok(handle) => {
                let id = handle.id().to_string();
                self.active = Some(handle);
                SANDBOX_SESSIONS.with_label_values(&["resumed"]).inc();
                info!(sandbox_id = %id, "Sandbox session resumed");
                Ok(Some(id))
            }
            Err(e) => {
                warn!(sandbox_id = %stale_id, error = %e, "Reconnect failed, creating a fresh sandbox");
                SANDBOX_SESSIONS.with_label_values(&["recreated"]).inc();
                self.create_session().await.map(Some)
            }
        }
    }

    /// Close the active sandbox, if any
    ///
    /// Local state is cleared even when the remote close fails.
    pub async fn close_session(&mut self) {
        let Some(handle) = self.active.take() else {
            return;
        };

        let id = handle.id().to_string();
        match handle.close().await {
            Ok(()) => {
                SANDBOX_SESSIONS.with_label_values(&["closed"]).inc();
                info!(sandbox_id = %id, "Sandbox session closed");
            }
            Err(e) => {
                SANDBOX_SESSIONS.with_label_values(&["close_failed"]).inc();
                warn!(sandbox_id = %id, error = %e, "Failed to close sandbox, dropping it anyway");
            }
        }
    }

    /// Run a shell command; `cwd` defaults to the working root
    pub async fn execute_command(
        &self,
        command: &str,
        cwd: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, SandboxError> {
        let handle = self.handle()?;
        let cwd = normalize_path(handle.working_root(), cwd.unwrap_or(""));
        debug!(sandbox_id = handle.id(), command, cwd = %cwd, "Executing command");
        handle.run(command, Some(&cwd), timeout).await
    }

    /// Perform a read/write/create/delete/list on a normalised path
    pub async fn file_operation(&self, op: &FileOperation) -> Result<SandboxOutput, SandboxError> {
        let kind = FileOpKind::parse(&op.op_type)?;
        let handle = self.handle()?;
        let path = normalize_path(handle.working_root(), &op.path);
        debug!(sandbox_id = handle.id(), op = %op.op_type, path = %path, "File operation");

        match kind {
            FileOpKind::Read => {
                let content = handle.read_file(&path).await?;
                Ok(SandboxOutput::FileContent { path, content })
            }
            FileOpKind::Write => {
                let content = op.content.as_deref().unwrap_or("");
                handle.write_file(&path, content).await?;
                Ok(SandboxOutput::Written {
                    path,
                    bytes_written: content.len(),
                })
            }
            FileOpKind::Create => {
                let is_dir = op.path.ends_with('/');
                if is_dir {
                    handle.make_dir(&path).await?;
                } else {
                    handle
                        .write_file(&path, op.content.as_deref().unwrap_or(""))
                        .await?;
                }
                Ok(SandboxOutput::Created { path, is_dir })
            }
            FileOpKind::Delete => {
                handle.remove(&path).await?;
                Ok(SandboxOutput::Deleted {
                    path,
                    deleted: true,
                })
            }
            FileOpKind::List => {
                let entries = handle.list(&path, op.recursive).await?;
                Ok(SandboxOutput::Listing { path, entries })
            }
        }
    }

    /// Write `code` to a fresh temp file and run it with the language's
    /// interpreter
    ///
    /// Temp-file removal is best effort and never replaces the run result.
    pub async fn execute_code(
        &self,
        language: &str,
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, SandboxError> {
        let language = CodeLanguage::parse(language)?;
        let handle = self.handle()?;

        let file = temp_code_path(language);
        handle.write_file(&file, code).await?;

        let command = language.launch_command(&file);
        debug!(sandbox_id = handle.id(), file = %file, "Executing code");
        let result = handle
            .run(&command, Some(handle.working_root()), timeout)
            .await;

        if let Err(e) = handle.remove(&file).await {
            debug!(file = %file, error = %e, "Temp code file cleanup failed");
        }

        result
    }

    /// Route one typed request to the matching operation
    pub async fn perform(&self, request: &SandboxRequest) -> Result<SandboxOutput, SandboxError> {
        match request {
            SandboxRequest::Command {
                command,
                cwd,
                timeout,
            } => self
                .execute_command(command, cwd.as_deref(), *timeout)
                .await
                .map(SandboxOutput::Process),
            SandboxRequest::File(op) => self.file_operation(op).await,
            SandboxRequest::Code {
                language,
                code,
                timeout,
            } => self
                .execute_code(language, code, *timeout)
                .await
                .map(SandboxOutput::Process),
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("session_id", &self.session_id())
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}
