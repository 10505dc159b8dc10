//! Sandbox session management
//!
//! This module owns the lifecycle of one remote execution sandbox and
//! translates its process and filesystem primitives into typed operations:
//! - Sandbox capability traits ([`SandboxProvider`], [`SandboxHandle`])
//! - Session lifecycle: create, resume, close ([`SessionManager`])
//! - Backends: host processes ([`LocalSandboxProvider`]) and a JSON/REST
//!   sandbox service ([`HttpSandboxProvider`])
//!
//! # Lifecycle
//!
//! ```text
//!   Absent ──ensure_session()/create_session()──► Active
//!     ▲                                             │
//!     │                                  operation fails with Timeout
//!     │                                             ▼
//!     │                         resume_session(): reconnect(id)
//!     │                              │ ok                │ err
//!     │                              ▼                   ▼
//!     │                         Active (same id)    create_session()
//!     │
//!     └──────────────── close_session() (always clears local state)
//! ```

pub mod error;
pub mod http;
pub mod local;
pub mod provider;
pub mod session;

pub use error::SandboxError;
pub use http::HttpSandboxProvider;
pub use local::LocalSandboxProvider;
pub use provider::{FileEntry, ProcessOutput, SandboxConfig, SandboxHandle, SandboxProvider};
pub use session::{
    normalize_path, FileOperation, SandboxOutput, SandboxRequest, SessionManager, SessionState,
};
