//! Host-process sandbox backend
//!
//! Every sandbox is a directory under a base directory on the host and
//! commands run through `/bin/sh -c` with that directory as working root.
//! There is no isolation whatsoever; this backend exists for development
//! and tests.
//!
//! Idle expiry is emulated: a sandbox that has not been used for its
//! `idle_timeout` fails the next operation with [`SandboxError::Timeout`]
//! until it is reattached through [`SandboxProvider::reconnect`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::error::SandboxError;
use super::provider::{FileEntry, ProcessOutput, SandboxConfig, SandboxHandle, SandboxProvider};

/// Exit code reported for commands killed on timeout
const TIMEOUT_EXIT_CODE: i32 = -1;

#[derive(Debug)]
struct LocalState {
    root: PathBuf,
    env: HashMap<String, String>,
    idle_timeout: Duration,
    last_used: Instant,
    expired: bool,
}

type Registry = Arc<Mutex<HashMap<String, LocalState>>>;

/// Provisions sandboxes as host directories
#[derive(Debug, Clone)]
pub struct LocalSandboxProvider {
    base_dir: PathBuf,
    sandboxes: Registry,
}

impl LocalSandboxProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            sandboxes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of sandboxes created and not yet closed
    pub async fn open_count(&self) -> usize {
        self.sandboxes.lock().await.len()
    }

    fn handle(&self, id: String, root: &Path) -> Box<dyn SandboxHandle> {
        Box::new(LocalSandbox {
            root_display: root.to_string_lossy().into_owned(),
            id,
            registry: Arc::clone(&self.sandboxes),
        })
    }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn create(&self, config: &SandboxConfig) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        let id = format!("sbx-{}", Uuid::now_v7().simple());
        let root = self.base_dir.join(&id);
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| SandboxError::Create(format!("{}: {}", root.display(), e)))?;

        self.sandboxes.lock().await.insert(
            id.clone(),
            LocalState {
                root: root.clone(),
                env: config.env.clone(),
                idle_timeout: config.idle_timeout,
                last_used: Instant::now(),
                expired: false,
            },
        );

        info!(sandbox_id = %id, root = %root.display(), "Local sandbox created");
        Ok(self.handle(id, &root))
    }

    async fn reconnect(&self, sandbox_id: &str) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        let mut sandboxes = self.sandboxes.lock().await;
        let state = sandboxes
            .get_mut(sandbox_id)
            .ok_or_else(|| SandboxError::Reconnect {
                id: sandbox_id.to_string(),
                message: "unknown or closed sandbox".to_string(),
            })?;

        state.expired = false;
        state.last_used = Instant::now();
        let root = state.root.clone();
        drop(sandboxes);

        debug!(sandbox_id, "Local sandbox reattached");
        Ok(self.handle(sandbox_id.to_string(), &root))
    }
}

/// One host-directory sandbox
struct LocalSandbox {
    id: String,
    root_display: String,
    registry: Registry,
}

impl LocalSandbox {
    /// Record use, failing if the sandbox went idle for too long
    ///
    /// An expired sandbox stays expired until reconnected; a failed touch
    /// does not refresh it.
    async fn touch(&self) -> Result<HashMap<String, String>, SandboxError> {
        let mut sandboxes = self.registry.lock().await;
        let state = sandboxes
            .get_mut(&self.id)
            .ok_or_else(|| SandboxError::Timeout(format!("sandbox {} is closed", self.id)))?;

        if state.expired || state.last_used.elapsed() > state.idle_timeout {
            state.expired = true;
            return Err(SandboxError::Timeout(format!(
                "sandbox {} idle for more than {:?}",
                self.id, state.idle_timeout
            )));
        }

        state.last_used = Instant::now();
        Ok(state.env.clone())
    }
}

#[async_trait]
impl SandboxHandle for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn working_root(&self) -> &str {
        &self.root_display
    }

    async fn run(
        &self,
        command: &str,
        cwd: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, SandboxError> {
        let env = self.touch().await?;

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd.unwrap_or(&self.root_display))
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(output) => output?,
                Err(_) => {
                    debug!(sandbox_id = %self.id, ?limit, "Command timed out, killed");
                    return Ok(ProcessOutput {
                        stdout: String::new(),
                        stderr: "Execution timed out".to_string(),
                        exit_code: TIMEOUT_EXIT_CODE,
                        timed_out: true,
                    });
                }
            },
            None => cmd.output().await?,
        };

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(TIMEOUT_EXIT_CODE),
            timed_out: false,
        })
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        self.touch().await?;
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        self.touch().await?;
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(tokio::fs::write(path, content).await?)
    }

    async fn make_dir(&self, path: &str) -> Result<(), SandboxError> {
        self.touch().await?;
        Ok(tokio::fs::create_dir_all(path).await?)
    }

    async fn remove(&self, path: &str) -> Result<(), SandboxError> {
        self.touch().await?;
        let meta = tokio::fs::metadata(path).await?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn list(&self, path: &str, recursive: bool) -> Result<Vec<FileEntry>, SandboxError> {
        self.touch().await?;

        let mut entries = Vec::new();
        let mut pending = vec![PathBuf::from(path)];
        while let Some(dir) = pending.pop() {
            let mut read_dir = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                let meta = entry.metadata().await?;
                let entry_path = entry.path();
                if recursive && meta.is_dir() {
                    pending.push(entry_path.clone());
                }
                entries.push(FileEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path: entry_path.to_string_lossy().into_owned(),
                    is_dir: meta.is_dir(),
                    size: if meta.is_dir() { None } else { Some(meta.len()) },
                });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn close(&self) -> Result<(), SandboxError> {
        let Some(state) = self.registry.lock().await.remove(&self.id) else {
            return Ok(());
        };
        let root = state.root;

        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(sandbox_id = %self.id, "Local sandbox closed");
        Ok(())
    }
}
