//! Browser automation over a long-lived Playwright driver process.
//!
//! The driver script is generated here, written to a temp directory, and
//! executed by `node`. One child stays alive for the whole test case and
//! speaks a line-delimited JSON protocol over stdin/stdout, so repeated DOM
//! polls hit the same page the previous click mutated.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::SuiteConfig;
use crate::dom::Element;
use crate::error::{HarnessError, Result};
use virtui_wait::WaitOpts;

#[derive(Debug, Clone, Copy, Default)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "firefox" => Browser::Firefox,
            "webkit" => Browser::Webkit,
            _ => Browser::Chromium,
        }
    }
}

/// One reply line from the driver. Every field is optional on the wire;
/// absent fields default so each command reads only what it asked for.
#[derive(Debug, Default, Deserialize)]
struct DriverReply {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    found: bool,
    #[serde(default)]
    visible: bool,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    text: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl DriverReply {
    fn into_result(self, selector: Option<&str>) -> Result<DriverReply> {
        if self.ok {
            return Ok(self);
        }
        let reason = self
            .error
            .unwrap_or_else(|| "unknown driver error".to_string());
        Err(match (self.kind.as_deref(), selector) {
            (Some("selector"), Some(sel)) => HarnessError::Selector {
                selector: sel.to_string(),
                reason,
            },
            _ => HarnessError::Driver(reason),
        })
    }
}

struct DriverIo {
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

/// Handle to the live browser driven for one test case.
pub struct BrowserSession {
    io: Mutex<DriverIo>,
    child: Child,
    wait: WaitOpts,
    // Holds driver.js for the lifetime of the child.
    _workdir: tempfile::TempDir,
}

impl BrowserSession {
    /// Start the driver and wait for its ready greeting.
    pub async fn launch(config: &SuiteConfig) -> Result<Self> {
        Self::check_playwright_installed()?;

        let workdir = tempfile::tempdir()?;
        let script_path = workdir.path().join("driver.js");
        std::fs::write(&script_path, build_driver_script(config))?;

        debug!(script = %script_path.display(), browser = config.browser.as_str(), "starting browser driver");

        let mut child = Command::new("node")
            .arg(&script_path)
            .current_dir(workdir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarnessError::Driver(format!("failed to spawn node: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarnessError::Driver("driver stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::Driver("driver stdout not captured".into()))?;
        let mut lines = BufReader::new(stdout).lines();

        match tokio::time::timeout(Duration::from_secs(60), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                let reply: DriverReply = serde_json::from_str(&line)?;
                if !reply.ready {
                    return Err(HarnessError::Driver(format!(
                        "unexpected driver greeting: {line}"
                    )));
                }
            }
            Ok(Ok(None)) => {
                return Err(HarnessError::Driver(
                    "driver exited before becoming ready".into(),
                ))
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(HarnessError::Driver(
                    "driver did not become ready within 60s".into(),
                ))
            }
        }

        debug!("browser driver ready");

        Ok(Self {
            io: Mutex::new(DriverIo { stdin, lines }),
            child,
            wait: config.dom_wait(),
            _workdir: workdir,
        })
    }

    /// Check if Playwright is installed
    fn check_playwright_installed() -> Result<()> {
        let output = std::process::Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(HarnessError::PlaywrightNotFound),
        }
    }

    pub fn wait_opts(&self) -> &WaitOpts {
        &self.wait
    }

    async fn request(&self, req: serde_json::Value) -> Result<DriverReply> {
        let mut io = self.io.lock().await;
        let mut line = serde_json::to_string(&req)?;
        line.push('\n');
        io.stdin.write_all(line.as_bytes()).await?;
        io.stdin.flush().await?;
        let reply = io.lines.next_line().await?.ok_or(HarnessError::DriverGone)?;
        Ok(serde_json::from_str(&reply)?)
    }

    /// Navigate to an absolute URL.
    pub async fn goto(&self, url: &str) -> Result<()> {
        debug!(%url, "navigating");
        self.request(json!({"cmd": "goto", "url": url}))
            .await?
            .into_result(None)?;
        Ok(())
    }

    /// Snapshot the first element matching `selector`. A selector that
    /// matches nothing is a normal answer, not an error.
    pub async fn query(&self, selector: &str) -> Result<Element> {
        let reply = self
            .request(json!({"cmd": "query", "selector": selector}))
            .await?
            .into_result(Some(selector))?;
        Ok(Element {
            selector: selector.to_string(),
            present: reply.found,
            visible: reply.visible,
            enabled: reply.enabled,
            text: reply.text,
        })
    }

    /// Whether any `element` (a CSS tag, or `*`) currently contains `text`.
    pub async fn text_present(&self, text: &str, element: &str) -> Result<bool> {
        let reply = self
            .request(json!({"cmd": "find_text", "text": text, "element": element}))
            .await?
            .into_result(None)?;
        Ok(reply.found)
    }

    /// Click without waiting. Call sites go through [`BrowserSession::click`]
    /// which first waits for the element to be clickable.
    pub(crate) async fn click_now(&self, selector: &str) -> Result<()> {
        self.request(json!({"cmd": "click", "selector": selector}))
            .await?
            .into_result(Some(selector))?;
        Ok(())
    }

    /// Shut the driver down, giving it a chance to close the browser.
    pub async fn close(mut self) -> Result<()> {
        {
            let mut io = self.io.lock().await;
            let mut line = serde_json::to_string(&json!({"cmd": "close"}))?;
            line.push('\n');
            let _ = io.stdin.write_all(line.as_bytes()).await;
            let _ = io.stdin.flush().await;
        }
        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "browser driver exited"),
            _ => {
                warn!("browser driver did not exit cleanly, killing it");
                let _ = self.child.kill().await;
            }
        }
        Ok(())
    }
}

/// Build the driver script executed by `node`.
fn build_driver_script(config: &SuiteConfig) -> String {
    format!(
        r#"const {{ chromium, firefox, webkit }} = require('playwright');
const readline = require('readline');

(async () => {{
  const browser = await {engine}.launch({{ headless: {headless} }});
  const context = await browser.newContext({{
    viewport: {{ width: {width}, height: {height} }}
  }});
  const page = await context.newPage();
  const reply = (obj) => process.stdout.write(JSON.stringify(obj) + '\n');
  const rl = readline.createInterface({{ input: process.stdin }});

  reply({{ ready: true }});

  for await (const line of rl) {{
    let req;
    try {{ req = JSON.parse(line); }} catch (e) {{
      reply({{ ok: false, kind: 'protocol', error: 'bad request: ' + e.message }});
      continue;
    }}
    try {{
      switch (req.cmd) {{
        case 'goto': {{
          await page.goto(req.url, {{ waitUntil: 'domcontentloaded' }});
          reply({{ ok: true }});
          break;
        }}
        case 'query': {{
          let el;
          try {{
            el = await page.$(req.selector);
          }} catch (e) {{
            reply({{ ok: false, kind: 'selector', error: e.message }});
            break;
          }}
          if (!el) {{
            reply({{ ok: true, found: false }});
            break;
          }}
          reply({{
            ok: true,
            found: true,
            visible: await el.isVisible(),
            enabled: await el.isEnabled(),
            text: (await el.textContent()) || ''
          }});
          break;
        }}
        case 'find_text': {{
          const found = await page.evaluate(([tag, needle]) => {{
            for (const el of document.querySelectorAll(tag)) {{
              if (el.textContent && el.textContent.includes(needle)) return true;
            }}
            return false;
          }}, [req.element, req.text]);
          reply({{ ok: true, found }});
          break;
        }}
        case 'click': {{
          try {{
            await page.click(req.selector, {{ timeout: 5000 }});
          }} catch (e) {{
            reply({{ ok: false, kind: 'selector', error: e.message }});
            break;
          }}
          reply({{ ok: true }});
          break;
        }}
        case 'close': {{
          reply({{ ok: true }});
          await browser.close();
          process.exit(0);
        }}
        default:
          reply({{ ok: false, kind: 'protocol', error: 'unknown command: ' + req.cmd }});
      }}
    }} catch (e) {{
      reply({{ ok: false, kind: 'page', error: e.message }});
    }}
  }}
}})();
"#,
        engine = config.browser.as_str(),
        headless = config.headless,
        width = config.viewport_width,
        height = config.viewport_height,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_script_embeds_engine_and_viewport() {
        let config = SuiteConfig {
            browser: Browser::Firefox,
            headless: false,
            viewport_width: 1920,
            viewport_height: 1080,
            ..SuiteConfig::default()
        };
        let script = build_driver_script(&config);
        assert!(script.contains("firefox.launch({ headless: false })"));
        assert!(script.contains("width: 1920, height: 1080"));
        assert!(script.contains("require('playwright')"));
    }

    #[test]
    fn ready_greeting_parses() {
        let reply: DriverReply = serde_json::from_str(r#"{"ready":true}"#).unwrap();
        assert!(reply.ready);
        assert!(!reply.ok);
    }

    #[test]
    fn query_reply_parses() {
        let reply: DriverReply = serde_json::from_str(
            r#"{"ok":true,"found":true,"visible":true,"enabled":false,"text":"shut off"}"#,
        )
        .unwrap();
        let reply = reply.into_result(Some("#vm-staticvm-state")).unwrap();
        assert!(reply.found);
        assert!(reply.visible);
        assert!(!reply.enabled);
        assert_eq!(reply.text, "shut off");
    }

    #[test]
    fn selector_failure_maps_to_selector_error() {
        let reply: DriverReply = serde_json::from_str(
            r#"{"ok":false,"kind":"selector","error":"'#[' is not a valid selector"}"#,
        )
        .unwrap();
        let err = reply.into_result(Some("#[")).unwrap_err();
        match err {
            HarnessError::Selector { selector, reason } => {
                assert_eq!(selector, "#[");
                assert!(reason.contains("not a valid selector"));
            }
            other => panic!("expected selector error, got {other}"),
        }
    }

    #[test]
    fn page_failure_maps_to_driver_error() {
        let reply: DriverReply =
            serde_json::from_str(r#"{"ok":false,"kind":"page","error":"net::ERR_ABORTED"}"#)
                .unwrap();
        assert!(matches!(
            reply.into_result(None),
            Err(HarnessError::Driver(_))
        ));
    }

    #[test]
    fn browser_parse_accepts_known_engines() {
        assert!(matches!(Browser::parse("firefox"), Browser::Firefox));
        assert!(matches!(Browser::parse("webkit"), Browser::Webkit));
        assert!(matches!(Browser::parse("anything"), Browser::Chromium));
    }
}
