//! Environment-driven configuration
//!
//! | Variable | Default |
//! |---|---|
//! | `SANDPILOT_MODEL_URL` | `http://localhost:11434/v1` |
//! | `SANDPILOT_MODEL` | `qwen3` |
//! | `SANDPILOT_API_KEY` | unset |
//! | `SANDPILOT_TEMPERATURE` | `0.0` |
//! | `SANDPILOT_MAX_ITERATIONS` | `10` |
//! | `SANDPILOT_SYSTEM_PROMPT` | built-in prompt |
//! | `SANDPILOT_CODE_TIMEOUT_SECS` | `30` |
//! | `SANDPILOT_SANDBOX_URL` | unset, selects the local backend |
//! | `SANDPILOT_SANDBOX_API_KEY` | unset |
//! | `SANDPILOT_SANDBOX_DIR` | `$TMPDIR/sandpilot` (local backend) |
//! | `SANDPILOT_SANDBOX_TEMPLATE` | unset |
//! | `SANDPILOT_WORKING_ROOT` | `/home/user` |
//! | `SANDPILOT_SANDBOX_IDLE_SECS` | `300` |
//! | `SANDPILOT_OTLP_ENDPOINT` | unset, no span export |
//!
//! Empty values count as unset.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::agent::AgentConfig;
use crate::llm::{ChatClient, ModelClient};
use crate::sandbox::{HttpSandboxProvider, LocalSandboxProvider, SandboxConfig, SandboxProvider};

const DEFAULT_MODEL_URL: &str = "http://localhost:11434/v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Which sandbox service backs the session manager
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxBackend {
    /// Host processes under a base directory, no isolation
    Local { base_dir: PathBuf },
    /// Remote sandbox REST service
    Http { url: String, api_key: Option<String> },
}

impl SandboxBackend {
    pub fn provider(&self, working_root: &str) -> Arc<dyn SandboxProvider> {
        match self {
            SandboxBackend::Local { base_dir } => Arc::new(LocalSandboxProvider::new(base_dir)),
            SandboxBackend::Http { url, api_key } => {
                let provider = HttpSandboxProvider::new(url).with_working_root(working_root);
                match api_key {
                    Some(key) => Arc::new(provider.with_api_key(key)),
                    None => Arc::new(provider),
                }
            }
        }
    }
}

/// Full process configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model_url: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub agent: AgentConfig,
    pub sandbox: SandboxConfig,
    pub backend: SandboxBackend,
    pub otlp_endpoint: Option<String>,
}

impl AppConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let agent_defaults = AgentConfig::default();
        let sandbox_defaults = SandboxConfig::default();

        let agent = AgentConfig {
            model: get("SANDPILOT_MODEL").unwrap_or(agent_defaults.model),
            max_iterations: parse(&get, "SANDPILOT_MAX_ITERATIONS")?
                .unwrap_or(agent_defaults.max_iterations),
            code_timeout_secs: parse(&get, "SANDPILOT_CODE_TIMEOUT_SECS")?
                .unwrap_or(agent_defaults.code_timeout_secs),
            system_prompt: get("SANDPILOT_SYSTEM_PROMPT"),
        };

        let sandbox = SandboxConfig {
            template: get("SANDPILOT_SANDBOX_TEMPLATE"),
            idle_timeout: parse(&get, "SANDPILOT_SANDBOX_IDLE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(sandbox_defaults.idle_timeout),
            working_root: get("SANDPILOT_WORKING_ROOT").unwrap_or(sandbox_defaults.working_root),
            env: sandbox_defaults.env,
        };

        let backend = match get("SANDPILOT_SANDBOX_URL") {
            Some(url) => SandboxBackend::Http {
                url,
                api_key: get("SANDPILOT_SANDBOX_API_KEY"),
            },
            None => SandboxBackend::Local {
                base_dir: get("SANDPILOT_SANDBOX_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| std::env::temp_dir().join("sandpilot")),
            },
        };

        let temperature: f32 = parse(&get, "SANDPILOT_TEMPERATURE")?.unwrap_or(0.0);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::Invalid {
                key: "SANDPILOT_TEMPERATURE",
                value: temperature.to_string(),
                reason: "must be between 0.0 and 2.0".to_string(),
            });
        }

        Ok(Self {
            model_url: get("SANDPILOT_MODEL_URL").unwrap_or_else(|| DEFAULT_MODEL_URL.to_string()),
            api_key: get("SANDPILOT_API_KEY"),
            temperature,
            agent,
            sandbox,
            backend,
            otlp_endpoint: get("SANDPILOT_OTLP_ENDPOINT"),
        })
    }

    /// Streaming model client for the configured endpoint
    pub fn model_client(&self) -> Arc<dyn ModelClient> {
        let client = ChatClient::new(&self.model_url, &self.agent.model)
            .with_temperature(self.temperature);
        match &self.api_key {
            Some(key) => Arc::new(client.with_api_key(key)),
            None => Arc::new(client),
        }
    }

    pub fn sandbox_provider(&self) -> Arc<dyn SandboxProvider> {
        self.backend.provider(&self.sandbox.working_root)
    }
}

fn parse<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.model_url, "http://localhost:11434/v1");
        assert_eq!(config.agent.model, "qwen3");
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.agent.code_timeout_secs, 30);
        assert_eq!(config.sandbox.working_root, "/home/user");
        assert_eq!(config.sandbox.idle_timeout, Duration::from_secs(300));
        assert!(config.api_key.is_none());
        assert!(config.otlp_endpoint.is_none());
        assert!(matches!(config.backend, SandboxBackend::Local { .. }));
    }

    #[test]
    fn test_http_backend_and_overrides() {
        let config = config_from(&[
            ("SANDPILOT_SANDBOX_URL", "https://sandbox.internal"),
            ("SANDPILOT_SANDBOX_API_KEY", "k"),
            ("SANDPILOT_MAX_ITERATIONS", " 25 "),
            ("SANDPILOT_TEMPERATURE", "0.7"),
            ("SANDPILOT_WORKING_ROOT", "/workspace"),
            ("SANDPILOT_API_KEY", ""),
        ])
        .unwrap();

        assert_eq!(
            config.backend,
            SandboxBackend::Http {
                url: "https://sandbox.internal".into(),
                api_key: Some("k".into())
            }
        );
        assert_eq!(config.agent.max_iterations, 25);
        assert!((config.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.sandbox.working_root, "/workspace");
        // empty counts as unset
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_invalid_numbers_are_reported() {
        let err = config_from(&[("SANDPILOT_MAX_ITERATIONS", "lots")]).unwrap_err();
        let ConfigError::Invalid { key, value, .. } = err;
        assert_eq!(key, "SANDPILOT_MAX_ITERATIONS");
        assert_eq!(value, "lots");

        assert!(config_from(&[("SANDPILOT_TEMPERATURE", "9")]).is_err());
        assert!(config_from(&[("SANDPILOT_SANDBOX_IDLE_SECS", "-1")]).is_err());
    }
}
