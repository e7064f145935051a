//! Bounded retry with fixed delay
//!
//! Sync treats transient RPC failures as expected weather. Every network
//! call runs under a small fixed-delay retry budget, with an observer hook
//! so callers can log each failed attempt before the next one.

use std::future::Future;
use std::time::Duration;

/// Attempt budget and inter-attempt delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

/// Run `op` until it succeeds or the budget is spent.
///
/// `on_failure` sees every failed attempt (1-based) before the delay. Once
/// attempts run out the last error is returned. The operation always runs at
/// least once.
pub async fn retry<T, E, F, Fut, O>(
    policy: RetryPolicy,
    mut op: F,
    mut on_failure: O,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    O: FnMut(&E, u32),
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                on_failure(&err, attempt);
                if attempt >= policy.attempts {
                    return Err(err);
                }
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}
