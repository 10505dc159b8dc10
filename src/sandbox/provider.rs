//! Sandbox capability traits
//!
//! A [`SandboxProvider`] provisions sandboxes and reattaches to existing
//! ones by id. A [`SandboxHandle`] is one live sandbox exposing process and
//! filesystem primitives. Paths passed to a handle are absolute paths inside
//! the sandbox; normalisation happens in the session manager.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::SandboxError;

/// Configuration for newly created sandboxes
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Provider-specific image/template name
    pub template: Option<String>,
    /// Inactivity after which the remote side expires the sandbox
    pub idle_timeout: Duration,
    /// Directory relative paths are rewritten onto
    pub working_root: String,
    /// Environment variables for every process in the sandbox
    pub env: HashMap<String, String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            template: None,
            idle_timeout: Duration::from_secs(300),
            working_root: "/home/user".to_string(),
            env: HashMap::new(),
        }
    }
}

/// Output of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    #[serde(default)]
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Entry in a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Provisions sandboxes
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Create a fresh sandbox
    async fn create(&self, config: &SandboxConfig) -> Result<Box<dyn SandboxHandle>, SandboxError>;

    /// Reattach to a previously created sandbox
    async fn reconnect(&self, sandbox_id: &str) -> Result<Box<dyn SandboxHandle>, SandboxError>;
}

/// One live sandbox
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    /// Opaque id issued by the provider
    fn id(&self) -> &str;

    /// Absolute directory relative paths resolve against
    fn working_root(&self) -> &str;

    /// Run a shell command and wait for it to exit
    async fn run(
        &self,
        command: &str,
        cwd: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, SandboxError>;

    async fn read_file(&self, path: &str) -> Result<String, SandboxError>;

    /// Create or overwrite a file, creating parent directories
    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;

    /// Create a directory and its parents
    async fn make_dir(&self, path: &str) -> Result<(), SandboxError>;

    /// Remove a file or a directory tree
    async fn remove(&self, path: &str) -> Result<(), SandboxError>;

    async fn list(&self, path: &str, recursive: bool) -> Result<Vec<FileEntry>, SandboxError>;

    /// Shut the sandbox down on the remote side
    async fn close(&self) -> Result<(), SandboxError>;
}
