//! Remote sandbox backend over a JSON/REST API
//!
//! Endpoints, relative to the base URL:
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | POST | `/sandboxes` | create |
//! | POST | `/sandboxes/{id}/connect` | reattach, refreshes the idle timer |
//! | POST | `/sandboxes/{id}/commands` | run a shell command |
//! | GET/PUT/DELETE | `/sandboxes/{id}/files?path=` | read, write, remove |
//! | GET/POST | `/sandboxes/{id}/directories` | list, make |
//! | DELETE | `/sandboxes/{id}` | close |
//!
//! An expired sandbox answers `410 Gone` or an error body with code
//! `sandbox_timeout`; both become [`SandboxError::Timeout`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::SandboxError;
use super::provider::{FileEntry, ProcessOutput, SandboxConfig, SandboxHandle, SandboxProvider};

const TIMEOUT_CODE: &str = "sandbox_timeout";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<&'a str>,
    timeout_secs: u64,
    #[serde(skip_serializing_if = "no_env")]
    env: &'a HashMap<String, String>,
}

fn no_env(env: &&HashMap<String, String>) -> bool {
    env.is_empty()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SandboxInfo {
    sandbox_id: String,
    #[serde(default)]
    working_root: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandRequest<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cwd: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileContent {
    content: String,
}

#[derive(Debug, Serialize)]
struct PathBody<'a> {
    path: &'a str,
}

#[derive(Debug, Deserialize)]
struct Listing {
    entries: Vec<FileEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Shared request plumbing for the provider and its handles
#[derive(Debug, Clone)]
struct Api {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl Api {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let request = self.client.request(method, url);
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Map non-success statuses onto the sandbox error taxonomy
    async fn check(response: Response) -> Result<Response, SandboxError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let message = body.message.unwrap_or(text);

        if status == StatusCode::GONE || body.code.as_deref() == Some(TIMEOUT_CODE) {
            return Err(SandboxError::Timeout(message));
        }
        Err(SandboxError::Remote(format!("HTTP {}: {}", status.as_u16(), message)))
    }

    async fn json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, SandboxError> {
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn empty(request: RequestBuilder) -> Result<(), SandboxError> {
        Self::check(request.send().await?).await?;
        Ok(())
    }
}

/// Provisions sandboxes from a remote sandbox service
#[derive(Debug, Clone)]
pub struct HttpSandboxProvider {
    api: Api,
    default_working_root: String,
}

impl HttpSandboxProvider {
    /// Create a provider
    ///
    /// # Arguments
    /// * `base_url` - Root of the sandbox API (e.g., "http://localhost:49999")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            api: Api {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                api_key: None,
                client: reqwest::Client::new(),
            },
            default_working_root: SandboxConfig::default().working_root,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api.api_key = Some(api_key.into());
        self
    }

    /// Working root assumed when the service does not report one
    pub fn with_working_root(mut self, working_root: impl Into<String>) -> Self {
        self.default_working_root = working_root.into();
        self
    }

    fn handle(&self, info: SandboxInfo) -> Box<dyn SandboxHandle> {
        Box::new(HttpSandbox {
            api: self.api.clone(),
            working_root: info
                .working_root
                .unwrap_or_else(|| self.default_working_root.clone()),
            id: info.sandbox_id,
        })
    }
}

#[async_trait]
impl SandboxProvider for HttpSandboxProvider {
    async fn create(&self, config: &SandboxConfig) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        let body = CreateRequest {
            template: config.template.as_deref(),
            timeout_secs: config.idle_timeout.as_secs(),
            env: &config.env,
        };
        let mut info: SandboxInfo = Api::json(self.api.request(Method::POST, "/sandboxes").json(&body))
            .await
            .map_err(|e| SandboxError::Create(e.to_string()))?;

        if info.working_root.is_none() {
            info.working_root = Some(config.working_root.clone());
        }
        info!(sandbox_id = %info.sandbox_id, "Remote sandbox created");
        Ok(self.handle(info))
    }

    async fn reconnect(&self, sandbox_id: &str) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        let path = format!("/sandboxes/{}/connect", sandbox_id);
        let info: SandboxInfo = Api::json(self.api.request(Method::POST, &path))
            .await
            .map_err(|e| SandboxError::Reconnect {
                id: sandbox_id.to_string(),
                message: e.to_string(),
            })?;

        debug!(sandbox_id = %info.sandbox_id, "Remote sandbox reattached");
        Ok(self.handle(info))
    }
}

struct HttpSandbox {
    api: Api,
    id: String,
    working_root: String,
}

impl HttpSandbox {
    fn request(&self, method: Method, suffix: &str) -> RequestBuilder {
        self.api
            .request(method, &format!("/sandboxes/{}{}", self.id, suffix))
    }
}

#[async_trait]
impl SandboxHandle for HttpSandbox {
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
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, SandboxError> {
        let body = CommandRequest {
            command,
            cwd,
            timeout_ms: timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
        };
        Api::json(self.request(Method::POST, "/commands").json(&body)).await
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let file: FileContent =
            Api::json(self.request(Method::GET, "/files").query(&[("path", path)])).await?;
        Ok(file.content)
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let body = FileContent {
            content: content.to_string(),
        };
        Api::empty(
            self.request(Method::PUT, "/files")
                .query(&[("path", path)])
                .json(&body),
        )
        .await
    }

    async fn make_dir(&self, path: &str) -> Result<(), SandboxError> {
        Api::empty(self.request(Method::POST, "/directories").json(&PathBody { path })).await
    }

    async fn remove(&self, path: &str) -> Result<(), SandboxError> {
        Api::empty(self.request(Method::DELETE, "/files").query(&[("path", path)])).await
    }

    async fn list(&self, path: &str, recursive: bool) -> Result<Vec<FileEntry>, SandboxError> {
        let recursive = if recursive { "true" } else { "false" };
        let listing: Listing = Api::json(
            self.request(Method::GET, "/directories")
                .query(&[("path", path), ("recursive", recursive)]),
        )
        .await?;
        Ok(listing.entries)
    }

    async fn close(&self) -> Result<(), SandboxError> {
        Api::empty(self.request(Method::DELETE, "")).await
    }
}
