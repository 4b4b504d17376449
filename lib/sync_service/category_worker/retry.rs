use std::future::Future;
use std::time::Duration;

use super::super::types::{RetryPolicy, SyncError};

/// Terminal state returned by the retry runner.
#[derive(Debug)]
pub struct RetryTerminal {
    pub error: SyncError,
    pub attempts: u32,
    /// True when the final error was recoverable but the budget ran out,
    /// as opposed to a fatal error that short-circuited the loop.
    pub exhausted: bool,
}

/// Executes one async category attempt under the bounded retry policy.
///
/// Recoverable errors burn one unit of budget each; a fatal error returns
/// immediately regardless of remaining budget. Retry delays derive from
/// `RetryPolicy` with deterministic per-worker jitter so concurrent user
/// workers don't synchronize their retries against a struggling upstream.
pub async fn run_with_retry<T, F, Fut>(
    retry_policy: &RetryPolicy,
    jitter_seed: u64,
    mut op: F,
) -> Result<(T, u32), RetryTerminal>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let max_attempts = retry_policy.total_attempts().max(1);

    for attempt in 1..=max_attempts {
        match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => {
                let recoverable = error.is_recoverable();
                if recoverable && attempt < max_attempts {
                    let delay = compute_backoff_delay(retry_policy, attempt, jitter_seed);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    continue;
                }
                return Err(RetryTerminal {
                    error,
                    attempts: attempt,
                    exhausted: recoverable && attempt == max_attempts,
                });
            }
        }
    }

    unreachable!("retry runner should return from loop")
}

pub fn compute_backoff_delay(policy: &RetryPolicy, attempt: u32, jitter_seed: u64) -> Duration {
    if policy.initial_backoff.is_zero() && policy.jitter.is_zero() {
        return Duration::ZERO;
    }

    let shift = u32::min(attempt.saturating_sub(1), 20);
    let exponential_ms = policy
        .initial_backoff
        .as_millis()
        .saturating_mul(1u128 << shift);
    let capped_ms = exponential_ms.min(policy.max_backoff.as_millis());

    let jitter_ms = if policy.jitter.is_zero() {
        0
    } else {
        deterministic_jitter(jitter_seed, attempt, policy.jitter.as_millis())
    };

    let total_ms = capped_ms.saturating_add(jitter_ms);
    Duration::from_millis(total_ms.min(u64::MAX as u128) as u64)
}

/// Stable per-(worker, attempt) jitter. Seed the worker by hashing its
/// username and category so reruns produce the same schedule.
fn deterministic_jitter(seed: u64, attempt: u32, jitter_cap: u128) -> u128 {
    if jitter_cap == 0 {
        return 0;
    }

    let mut x = seed ^ (attempt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;

    (x as u128) % (jitter_cap + 1)
}

/// Hashes a worker identity into a jitter seed.
pub fn jitter_seed_for(username: &str, category: &str) -> u64 {
    let mut seed: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in username.bytes().chain([b'/']).chain(category.bytes()) {
        seed ^= u64::from(byte);
        seed = seed.wrapping_mul(0x0000_0100_0000_01b3);
    }
    seed
}
