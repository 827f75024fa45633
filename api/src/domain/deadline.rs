//! Caller-supplied deadlines
//!
//! Every blocking directory operation takes a [`Deadline`]: the caller's
//! own bound on the work, distinct from the pool's acquisition timeout
//! and the per-connection timeout. When the caller's deadline elapses
//! first the operation fails with `cancelled`, never `pool-exhausted`
//! or `timeout`.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::DirectoryError;

/// A caller's deadline for an operation.
///
/// `none()` imposes no caller bound; the pool and connection timeouts
/// still apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No caller-imposed bound.
    pub fn none() -> Self {
        Deadline(None)
    }

    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Deadline(Some(Instant::now() + timeout))
    }

    pub fn at(instant: Instant) -> Self {
        Deadline(Some(instant))
    }

    pub fn is_unbounded(&self) -> bool {
        self.0.is_none()
    }

    pub fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// The earlier of two deadlines.
    pub fn min(self, other: Deadline) -> Deadline {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Deadline(Some(a.min(b))),
            (a, b) => Deadline(a.or(b)),
        }
    }

    /// Clamp an operation timeout to whatever is left on this deadline.
    pub fn clamp(&self, timeout: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => remaining.min(timeout),
            None => timeout,
        }
    }

    /// Fail fast when the deadline has already elapsed.
    pub fn check(&self) -> Result<(), DirectoryError> {
        if self.expired() {
            Err(DirectoryError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the deadline elapses; pends forever when unbounded.
    pub async fn elapsed(&self) {
        match self.0 {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    }
}
