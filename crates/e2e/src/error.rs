//! Error types for the console test harness

use thiserror::Error;
use virtui_wait::WaitError;

/// Result type alias using [`HarnessError`]
pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("browser driver failed: {0}")]
    Driver(String),

    #[error("browser driver exited unexpectedly")]
    DriverGone,

    #[error("invalid selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },

    #[error("timed out waiting for {what}: {source}")]
    Timeout {
        what: String,
        #[source]
        source: WaitError,
    },

    #[error("`{cmd}` exited with status {status}: {stderr}")]
    Shell {
        cmd: String,
        status: i32,
        stderr: String,
    },

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("wait failed: {0}")]
    Wait(#[from] WaitError),

    #[error("bad pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Fail the enclosing test case with an assertion error unless `cond` holds.
pub fn ensure(cond: bool, msg: impl Into<String>) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(HarnessError::Assertion(msg.into()))
    }
}
