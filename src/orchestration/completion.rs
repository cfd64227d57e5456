//! Text-completion service boundary.
//!
//! The planner treats the completion service as a black box: request in,
//! free text out. `HeadlessCompletion` shells out to an external binary in
//! non-interactive mode; tests substitute canned implementations.

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Default timeout for a completion call (2 minutes).
pub const DEFAULT_COMPLETION_TIMEOUT_SECS: u64 = 120;

/// A black-box text-completion service.
///
/// Object safe so the planner can hold `Arc<dyn CompletionService>` and
/// tests can swap in stubs.
pub trait CompletionService: Send + Sync {
    /// Produce a completion for the prompt under the given system context.
    fn complete<'a>(&'a self, system: &'a str, prompt: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// Completion client that runs an external binary in headless mode.
///
/// The binary is invoked with `-p <prompt>` and is expected to print the
/// completion on stdout. Any failure mode (missing binary, timeout,
/// non-zero exit) surfaces as `CompletionUnavailable`; the planner
/// converts that into the fallback graph rather than propagating it.
#[derive(Debug, Clone)]
pub struct HeadlessCompletion {
    /// Path to the completion binary.
    binary: PathBuf,
    /// Timeout for one call.
    timeout: Duration,
}

impl HeadlessCompletion {
    /// Create a client, locating the binary by name with `which`.
    ///
    /// # Errors
    ///
    /// Returns `CompletionUnavailable` if the binary cannot be found.
    pub fn new(command: &str) -> Result<Self> {
        let binary = which::which(command).map_err(|_| {
            Error::CompletionUnavailable(format!("binary not found: {}", command))
        })?;
        Ok(Self {
            binary,
            timeout: Duration::from_secs(DEFAULT_COMPLETION_TIMEOUT_SECS),
        })
    }

    /// Create a client with an explicit binary path.
    pub fn with_binary(binary: PathBuf) -> Self {
        Self {
            binary,
            timeout: Duration::from_secs(DEFAULT_COMPLETION_TIMEOUT_SECS),
        }
    }

    /// Set a custom timeout for completion calls.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Path of the configured binary.
    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl CompletionService for HeadlessCompletion {
    fn complete<'a>(&'a self, system: &'a str, prompt: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let full_prompt = format!("{}\n\n{}", system, prompt);
            let output = tokio::time::timeout(
                self.timeout,
                Command::new(&self.binary).arg("-p").arg(&full_prompt).output(),
            )
            .await
            .map_err(|_| {
                Error::CompletionUnavailable(format!("timed out after {:?}", self.timeout))
            })?
            .map_err(|e| Error::CompletionUnavailable(e.to_string()))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(Error::CompletionUnavailable(format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                )));
            }

            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        })
    }
}
