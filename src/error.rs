use std::time::Duration;

use thiserror::Error;

/// Failure categories of a deployment run.
///
/// Code paths return `anyhow::Result` and attach context as they go; one of
/// these sits at the root of the chain so callers can tell the categories apart.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Missing or incomplete registry entry.
    #[error("configuration error: {0}")]
    Config(String),

    /// Remote artifact missing, empty, or unreachable.
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Bad passphrase or corrupt ciphertext. The two are indistinguishable.
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// An external command exited non-zero.
    #[error("command failed (exit {code}): {cmd}\n{stderr}")]
    Tool {
        cmd: String,
        code: i32,
        stderr: String,
    },

    /// A bounded poll ran out of attempts.
    #[error("{what}: gave up after {attempts} attempts ({interval:?} apart)")]
    Timeout {
        what: String,
        attempts: u32,
        interval: Duration,
    },
}

impl DeployError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn fetch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Find the typed root cause inside an `anyhow` chain.
pub fn root_cause(err: &anyhow::Error) -> Option<&DeployError> {
    err.chain().find_map(|e| e.downcast_ref::<DeployError>())
}
