use std::future::Future;
use std::time::Duration;

use log::warn;

use crate::error::{MinerError, Result};

/// Bounded retry for transient remote failures. One policy is shared by every
/// call site so there is exactly one place that decides how persistent the
/// miner is about flaky responses.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. A spent budget downgrades the last
    /// `RetryableRemote` into a plain `Remote` for the caller.
    pub async fn run<T, F, Fut>(&self, name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        name, attempt, self.max_attempts, err
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(MinerError::RetryableRemote(msg)) => {
                    return Err(MinerError::Remote(msg));
                }
                Err(err) => return Err(err),
            }
        }
    }
}
