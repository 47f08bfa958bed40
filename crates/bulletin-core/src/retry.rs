//! Bounded retry
//!
//! TigerStyle: Every loop has an explicit upper bound.
//!
//! [`attempt`] re-invokes a fresh read-mutate-check cycle up to `max_attempts`
//! times with no delay between attempts. The closure classifies each failure as
//! [`AttemptError::Permanent`] (return immediately) or
//! [`AttemptError::Transient`] (log and try again).

use crate::error::{Error, Result};
use std::future::Future;
use tracing::warn;

/// How a single attempt failed
#[derive(Debug)]
pub enum AttemptError {
    /// Stop retrying and return this error
    Permanent(Error),
    /// Retry if attempts remain; returned if this was the last one
    Transient(Error),
}

impl AttemptError {
    pub fn into_inner(self) -> Error {
        match self {
            Self::Permanent(e) | Self::Transient(e) => e,
        }
    }
}

/// Run `f` until it succeeds, fails permanently, or `max_attempts` is used up
///
/// `f` receives the 1-based attempt number. On exhaustion the last transient
/// error is returned.
pub async fn attempt<T, F, Fut>(max_attempts: u32, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, AttemptError>>,
{
    assert!(max_attempts > 0, "max_attempts must be positive");

    let mut last_error = None;
    for attempt_number in 1..=max_attempts {
        match f(attempt_number).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Permanent(e)) => return Err(e),
            Err(AttemptError::Transient(e)) => {
                warn!(
                    operation = operation,
                    attempt = attempt_number,
                    max_attempts = max_attempts,
                    error = %e,
                    "attempt failed"
                );
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::internal(format!("{} made no attempts", operation))))
}
