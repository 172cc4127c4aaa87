//! Domain-specific error types for sandbox operations.
//!
//! Typed errors enable callers to match on specific failure modes:
//! resource acquisition (engine, ports, container start, health) is kept
//! distinct from execution failures.

use std::time::Duration;

/// Errors that can occur during sandbox operations.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The container engine is not running or not reachable.
    #[error("container engine is not available: {message}")]
    EngineUnavailable { message: String },

    /// A requested host port is already bound or claimed.
    ///
    /// A stale caller-supplied port usually indicates a leaked prior
    /// container, so this fails fast instead of retrying.
    #[error("host port {port} is not available")]
    PortUnavailable { port: u16 },

    /// No free host port could be found.
    #[error("could not find a free host port: {message}")]
    PortExhausted { message: String },

    /// Creating or starting the container failed.
    #[error("container start failed: {message}")]
    ContainerStart { message: String },

    /// The container never reported healthy within the timeout.
    #[error("health check timed out after {timeout_secs} seconds")]
    HealthCheckTimeout { timeout_secs: u64 },

    /// Executing a command inside the sandbox failed.
    #[error("sandbox exec failed: {message}")]
    Exec { message: String },

    /// Reading or writing a file through the sandbox failed.
    #[error("sandbox file io failed: {message}")]
    FileIo { message: String },

    /// The sandbox was used before `start()` succeeded.
    #[error("sandbox is not started")]
    NotStarted,
}

impl SandboxError {
    /// Creates an `EngineUnavailable` error.
    pub fn engine_unavailable(message: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            message: message.into(),
        }
    }

    /// Creates a `ContainerStart` error.
    pub fn container_start(message: impl Into<String>) -> Self {
        Self::ContainerStart {
            message: message.into(),
        }
    }

    /// Creates a `HealthCheckTimeout` error from a `Duration`.
    pub fn health_timeout(duration: Duration) -> Self {
        Self::HealthCheckTimeout {
            timeout_secs: duration.as_secs(),
        }
    }

    /// Creates an `Exec` error.
    pub fn exec(message: impl Into<String>) -> Self {
        Self::Exec {
            message: message.into(),
        }
    }

    /// Creates a `FileIo` error.
    pub fn file_io(message: impl Into<String>) -> Self {
        Self::FileIo {
            message: message.into(),
        }
    }

    /// Returns true if this is a port conflict.
    pub fn is_port_unavailable(&self) -> bool {
        matches!(self, Self::PortUnavailable { .. })
    }

    /// Returns true if this is a health-check timeout.
    pub fn is_health_timeout(&self) -> bool {
        matches!(self, Self::HealthCheckTimeout { .. })
    }

    /// Returns true if the engine itself was unreachable.
    pub fn is_engine_unavailable(&self) -> bool {
        matches!(self, Self::EngineUnavailable { .. })
    }
}
