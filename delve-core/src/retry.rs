//! Bounded exponential backoff for transient backend failures.
//!
//! Shared by the LLM provider and the search executors. The research engine
//! never retries; by the time an error reaches it, the adapter has given up.

use crate::config::RetryConfig;
use crate::error::{LlmError, SearchError};
use std::future::Future;
use std::time::Duration;

/// Errors that know whether they are worth another attempt.
pub trait Transient: std::fmt::Display {
    fn is_transient(&self) -> bool;

    /// Server-provided delay hint, if any.
    fn retry_after_secs(&self) -> Option<u64> {
        None
    }
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        LlmError::is_transient(self)
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            LlmError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl Transient for SearchError {
    fn is_transient(&self) -> bool {
        SearchError::is_transient(self)
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            SearchError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Rate-limit errors wait at least as long as the server asked. Permanent errors
/// (auth, parse, schema) return immediately.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !e.is_transient() || attempt >= config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// A server hint may stretch a wait to at most this many times `max_backoff_ms`.
const RETRY_AFTER_CEILING_FACTOR: u64 = 8;

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff<E: Transient>(config: &RetryConfig, attempt: u32, err: &E) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    match err.retry_after_secs() {
        Some(secs) => {
            let ceiling = config
                .max_backoff_ms
                .saturating_mul(RETRY_AFTER_CEILING_FACTOR);
            secs.saturating_mul(1000).min(ceiling).max(computed)
        }
        None => computed,
    }
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Up to 25% extra
        let jitter = (capped as f64 * 0.25 * rand_simple()) as u64;
        capped + jitter
    } else {
        capped
    }
}

/// Cheap clock-derived fraction in [0, 1) for jitter.
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
