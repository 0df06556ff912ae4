//! Condition polling against externally-mutating state.
//!
//! Everything a browser test observes changes asynchronously underneath it:
//! DOM nodes render after a click, serial console logs fill up as a guest
//! boots, `virsh` output flips once the daemon catches up. This crate
//! provides the one retry primitive the rest of the suite synchronizes
//! with: evaluate a check, and if it has not produced a value yet, sleep
//! and evaluate again until a deadline passes.
//!
//! A check returns `Ok(Some(value))` for a match, `Ok(None)` for "no match
//! yet", or a [`CheckError`]. A recoverable lookup failure
//! ([`CheckError::NotFound`]) retries exactly like a non-match; anything
//! else aborts the wait immediately. A matched value may be empty (an empty
//! string is still a match) since "matched" and "present" are carried by
//! the `Option`, not by the value itself.

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace};

/// Default delay between check evaluations.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(3);

/// Default total deadline for a wait call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error raised by a check while observing external state.
#[derive(Error, Debug)]
pub enum CheckError {
    /// The observed resource does not exist yet. Retried like a plain
    /// non-match.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other failure. Aborts the wait at once.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

/// What the poller saw on the most recent non-matching evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    /// The check ran and returned no match.
    NoMatch,
    /// The check failed with a recoverable lookup error.
    NotFound(String),
}

impl std::fmt::Display for Observed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Observed::NoMatch => write!(f, "check returned no match"),
            Observed::NotFound(msg) => write!(f, "lookup failed: {msg}"),
        }
    }
}

/// Terminal outcome of a wait that did not produce a value.
#[derive(Error, Debug)]
pub enum WaitError {
    /// The deadline passed without a match. Carries the elapsed time and
    /// the last observation for diagnostics.
    #[error("condition not met after {elapsed:?} ({last})")]
    Timeout { elapsed: Duration, last: Observed },

    /// The check failed in a way retrying cannot fix.
    #[error("check failed: {0}")]
    Check(anyhow::Error),
}

/// Poll pacing: how often to re-evaluate and how long to keep trying.
#[derive(Debug, Clone)]
pub struct WaitOpts {
    pub delay: Duration,
    pub timeout: Duration,
}

impl Default for WaitOpts {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl WaitOpts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Repeatedly evaluate `check` until it yields a value or `opts.timeout`
/// passes.
///
/// The first evaluation happens immediately; a match on it returns without
/// sleeping. `Ok(None)` and [`CheckError::NotFound`] both mean "no match
/// yet" and lead to another round after `opts.delay`. Any other error
/// aborts the wait.
pub async fn wait<T, F, Fut>(opts: &WaitOpts, mut check: F) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, CheckError>>,
{
    let start = Instant::now();
    let mut last = Observed::NoMatch;

    loop {
        match check().await {
            Ok(Some(value)) => {
                trace!(elapsed = ?start.elapsed(), "condition met");
                return Ok(value);
            }
            Ok(None) => last = Observed::NoMatch,
            Err(CheckError::NotFound(msg)) => {
                trace!(%msg, "lookup failed, retrying");
                last = Observed::NotFound(msg);
            }
            Err(CheckError::Fatal(err)) => return Err(WaitError::Check(err)),
        }

        let elapsed = start.elapsed();
        if elapsed >= opts.timeout {
            debug!(?elapsed, timeout = ?opts.timeout, %last, "gave up waiting");
            return Err(WaitError::Timeout { elapsed, last });
        }
        tokio::time::sleep(opts.delay).await;
    }
}
