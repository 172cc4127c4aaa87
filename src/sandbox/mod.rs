//! Sandboxed execution environments for exam attempts.
//!
//! A sandbox binds a workspace directory into an isolated runtime with
//! negotiated host resources (ports, mounts, environment). Backends are
//! selected at construction via [`SandboxFactory`]: container-based
//! (`docker`), local-process (`local`), or a recording mock in tests.

pub mod docker;
pub mod error;
pub mod local;
pub mod ports;

#[cfg(test)]
pub mod mock;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::SandboxError;

/// Container platform flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    Amd64,
    Arm64,
}

impl Platform {
    /// Detects the platform from the host architecture.
    pub fn detect() -> Self {
        match std::env::consts::ARCH {
            "aarch64" | "arm" => Self::Arm64,
            _ => Self::Amd64,
        }
    }

    /// The engine's platform string.
    pub fn as_engine_str(&self) -> &'static str {
        match self {
            Self::Amd64 => "linux/amd64",
            Self::Arm64 => "linux/arm64",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_engine_str())
    }
}

/// Describes the runtime a sandbox should start.
///
/// `host_port` is negotiated at start time when unset; a caller-supplied
/// value is verified and never silently replaced.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    /// Image (or backend-specific identifier) to run.
    pub image: String,
    pub platform: Platform,
    /// Preferred host port for the service endpoint; probed when `None`.
    pub host_port: Option<u16>,
    /// Workspace directory bind-mounted read-write at `/workspace`.
    pub mount_dir: PathBuf,
    /// Additional host:container mounts.
    pub extra_mounts: BTreeMap<String, String>,
    /// Environment variable names forwarded from the calling process.
    /// Names absent from the environment are silently skipped.
    pub forward_env: Vec<String>,
    /// Environment variables set unconditionally.
    pub extra_env: BTreeMap<String, String>,
    /// Also map the two sequential auxiliary service ports.
    pub expose_aux_ports: bool,
    /// Request all host GPUs.
    pub enable_gpu: bool,
    /// Map `host.docker.internal` to the host gateway (for reaching a
    /// host-side inference server from inside the container).
    pub enable_host_gateway: bool,
}

impl SandboxSpec {
    pub fn new(image: impl Into<String>, mount_dir: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            platform: Platform::detect(),
            host_port: None,
            mount_dir: mount_dir.into(),
            extra_mounts: BTreeMap::new(),
            forward_env: Vec::new(),
            extra_env: BTreeMap::new(),
            expose_aux_ports: false,
            enable_gpu: false,
            enable_host_gateway: false,
        }
    }
}

/// Captured output of a command executed inside a sandbox.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An isolated execution environment bound to a workspace directory.
///
/// `start` claims host resources and blocks until the runtime is
/// healthy; `stop` is idempotent and treats "already gone" as success.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Backend name for logs and display.
    fn name(&self) -> &'static str;

    /// Claims resources and starts the runtime; ready only after the
    /// health check passes.
    async fn start(&mut self) -> Result<(), SandboxError>;

    /// Stops the runtime and releases its resources. Idempotent.
    async fn stop(&mut self) -> Result<(), SandboxError>;

    /// Runs a command in the sandbox's workspace, capturing output.
    async fn execute(&self, command: &[String]) -> Result<ExecOutput, SandboxError>;

    /// Reads a workspace-relative file.
    async fn read_file(&self, path: &Path) -> Result<String, SandboxError>;

    /// Writes a workspace-relative file.
    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), SandboxError>;
}

/// Constructs sandboxes for a chosen backend.
///
/// The backend is fixed at construction time, not per call.
pub trait SandboxFactory: Send + Sync {
    fn create(&self, spec: SandboxSpec) -> Box<dyn Sandbox>;
}
