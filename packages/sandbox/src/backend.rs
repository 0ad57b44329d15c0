//! Pool Backend Abstraction
//!
//! The container runtime seam. The pool only needs create / start / exec /
//! remove; isolation hardening (read-only root, no network, quotas, tmpfs
//! `/tmp`, privilege drop after root cleanup) lives behind this trait.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

/// Pool and backend errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("no idle container within the deadline")]
    Exhausted,
    #[error("pool is shut down")]
    Closed,
    #[error("backend container {0} not found")]
    UnknownContainer(String),
    #[error("container {id} exec failed: {message}")]
    ExecFailed { id: String, message: String },
    #[error("scrub failed for container {id}: {message}")]
    ScrubFailed { id: String, message: String },
    #[error("backend error: {0}")]
    Backend(String),
}

/// Combined output of a command run inside a container.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Combined stdout + stderr, the form escrowed by the gateway.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Container runtime seam.
#[async_trait]
pub trait PoolBackend: Send + Sync {
    /// Provision a container; returns the backend handle.
    async fn create(&self) -> Result<String, PoolError>;

    /// Start a provisioned container.
    async fn start(&self, id: &str) -> Result<(), PoolError>;

    /// Run a command inside the container with the payload on stdin.
    async fn exec(&self, id: &str, cmd: &[String], stdin: &[u8]) -> Result<ExecOutput, PoolError>;

    /// Destroy a container.
    async fn remove(&self, id: &str) -> Result<(), PoolError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerState {
    Created,
    Running,
}

/// In-memory backend for development and tests.
///
/// Simulates the runtime: `exec` echoes the command and payload size, and
/// failure injection flips the scrub or exec paths for specific containers.
#[derive(Default)]
pub struct EphemeralBackend {
    containers: RwLock<HashMap<String, ContainerState>>,
    counter: std::sync::atomic::AtomicU64,
    /// When set, exec of this command fails everywhere (scrub-failure tests)
    failing_command: RwLock<Option<String>>,
}

impl EphemeralBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every exec of `command` fail, e.g. the scrub command.
    pub fn fail_command(&self, command: impl Into<String>) {
        *self.failing_command.write() = Some(command.into());
    }

    /// Number of live containers.
    pub fn live_count(&self) -> usize {
        self.containers.read().len()
    }
}

#[async_trait]
impl PoolBackend for EphemeralBackend {
    async fn create(&self) -> Result<String, PoolError> {
        let n = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let id = format!("ghost-{n}");
        self.containers
            .write()
            .insert(id.clone(), ContainerState::Created);
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), PoolError> {
        let mut containers = self.containers.write();
        match containers.get_mut(id) {
            Some(state) => {
                *state = ContainerState::Running;
                Ok(())
            }
            None => Err(PoolError::UnknownContainer(id.to_string())),
        }
    }

    async fn exec(&self, id: &str, cmd: &[String], stdin: &[u8]) -> Result<ExecOutput, PoolError> {
        {
            let containers = self.containers.read();
            match containers.get(id) {
                Some(ContainerState::Running) => {}
                Some(ContainerState::Created) => {
                    return Err(PoolError::ExecFailed {
                        id: id.to_string(),
                        message: "container not started".to_string(),
                    })
                }
                None => return Err(PoolError::UnknownContainer(id.to_string())),
            }
        }

        let command = cmd.join(" ");
        if let Some(failing) = self.failing_command.read().as_deref() {
            if command.starts_with(failing) {
                return Err(PoolError::ExecFailed {
                    id: id.to_string(),
                    message: format!("injected failure for '{command}'"),
                });
            }
        }

        Ok(ExecOutput {
            stdout: format!("{command}: processed {} bytes", stdin.len()),
            stderr: String::new(),
        })
    }

    async fn remove(&self, id: &str) -> Result<(), PoolError> {
        match self.containers.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(PoolError::UnknownContainer(id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle() {
        let backend = EphemeralBackend::new();
        let id = backend.create().await.unwrap();
        backend.start(&id).await.unwrap();

        let out = backend
            .exec(&id, &["echo".to_string()], b"hello")
            .await
            .unwrap();
        assert_eq!(out.stdout, "echo: processed 5 bytes");

        backend.remove(&id).await.unwrap();
        assert_eq!(backend.live_count(), 0);
    }

    #[tokio::test]
    async fn test_exec_before_start_fails() {
        let backend = EphemeralBackend::new();
        let id = backend.create().await.unwrap();
        let err = backend.exec(&id, &["echo".to_string()], b"").await.unwrap_err();
        assert!(matches!(err, PoolError::ExecFailed { .. }));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let backend = EphemeralBackend::new();
        let id = backend.create().await.unwrap();
        backend.start(&id).await.unwrap();
        backend.fail_command("scrub");

        let err = backend
            .exec(&id, &["scrub".to_string(), "--all".to_string()], b"")
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::ExecFailed { .. }));

        // Other commands still work.
        assert!(backend.exec(&id, &["echo".to_string()], b"").await.is_ok());
    }

    #[test]
    fn test_combined_output() {
        let both = ExecOutput {
            stdout: "out".to_string(),
            stderr: "err".to_string(),
        };
        assert_eq!(both.combined(), "out\nerr");

        let only_out = ExecOutput {
            stdout: "out".to_string(),
            stderr: String::new(),
        };
        assert_eq!(only_out.combined(), "out");
    }
}
