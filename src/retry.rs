use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use crate::error::DeployError;

/// Fixed-interval bounded poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Container init marker: 30 x 2s
    pub const fn container_ready() -> Self {
        Self::new(30, Duration::from_secs(2))
    }

    /// Backup service active-state: 30 x 2s
    pub const fn service_ready() -> Self {
        Self::new(30, Duration::from_secs(2))
    }

    /// Datastore create call: 10 x 3s
    pub const fn datastore_create() -> Self {
        Self::new(10, Duration::from_secs(3))
    }

    /// Calls `op` until it yields `Some`, sleeping between attempts.
    ///
    /// Errors from `op` are fatal and returned as-is; running out of attempts
    /// is a [`DeployError::Timeout`] named after `what`.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        for attempt in 1..=self.max_attempts {
            if let Some(value) = op(attempt).await? {
                return Ok(value);
            }

            debug!("{}: attempt {}/{} not ready", what, attempt, self.max_attempts);

            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        Err(DeployError::Timeout {
            what: what.to_string(),
            attempts: self.max_attempts,
            interval: self.interval,
        }
        .into())
    }
}
