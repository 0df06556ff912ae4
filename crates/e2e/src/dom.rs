//! Element conditions layered on the condition poller.
//!
//! The console renders asynchronously, so every assertion about it is a
//! wait: look the element up, check the condition, and if it does not hold
//! yet, poll again until the deadline. Absence checks invert the usual
//! handling: for [`Cond::Invisible`] a failed lookup is the match.

use tracing::debug;
use virtui_wait::{wait, CheckError, WaitError};

use crate::browser::BrowserSession;
use crate::error::{HarnessError, Result};

/// Snapshot of one DOM lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub selector: String,
    /// Whether the selector matched anything at all
    pub present: bool,
    pub visible: bool,
    pub enabled: bool,
    pub text: String,
}

/// Secondary condition checked after the selector lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cond {
    /// The element exists in the DOM
    Present,
    /// The element is visible and enabled
    Clickable,
    /// The element is hidden, or gone entirely
    Invisible,
    /// The element's text contains the given substring
    TextIn(String),
}

impl Cond {
    pub fn matches(&self, el: &Element) -> bool {
        match self {
            Cond::Present => el.present,
            Cond::Clickable => el.present && el.visible && el.enabled,
            Cond::Invisible => !el.present || !el.visible,
            Cond::TextIn(needle) => el.present && el.text.contains(needle),
        }
    }
}

impl std::fmt::Display for Cond {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cond::Present => write!(f, "present"),
            Cond::Clickable => write!(f, "clickable"),
            Cond::Invisible => write!(f, "invisible"),
            Cond::TextIn(needle) => write!(f, "showing '{needle}'"),
        }
    }
}

impl BrowserSession {
    /// Poll `selector` until `cond` holds, returning the matching snapshot.
    pub async fn wait_css(&self, selector: &str, cond: Cond) -> Result<Element> {
        debug!(selector, %cond, "waiting for element");
        wait(self.wait_opts(), || {
            let cond = cond.clone();
            async move {
                let el = self.query(selector).await.map_err(fatal)?;
                Ok(cond.matches(&el).then_some(el))
            }
        })
        .await
        .map_err(|err| match err {
            WaitError::Timeout { .. } => HarnessError::Timeout {
                what: format!("{selector} to become {cond}"),
                source: err,
            },
            other => other.into(),
        })
    }

    /// Poll until some `element` (a CSS tag, or `*`) contains `text`.
    pub async fn wait_text(&self, text: &str, element: &str) -> Result<()> {
        debug!(text, element, "waiting for text");
        wait(self.wait_opts(), || async move {
            let found = self.text_present(text, element).await.map_err(fatal)?;
            Ok(found.then_some(()))
        })
        .await
        .map_err(|err| match err {
            WaitError::Timeout { .. } => HarnessError::Timeout {
                what: format!("text '{text}' in <{element}>"),
                source: err,
            },
            other => other.into(),
        })
    }

    /// Wait until `selector` is clickable, then click it.
    pub async fn click(&self, selector: &str) -> Result<()> {
        self.wait_css(selector, Cond::Clickable).await?;
        self.click_now(selector).await
    }
}

fn fatal(err: HarnessError) -> CheckError {
    CheckError::Fatal(anyhow::Error::new(err))
}
