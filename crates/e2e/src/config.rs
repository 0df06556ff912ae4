//! Suite configuration
//!
//! Every knob defaults to a local development setup; CI overrides through
//! `VIRTUI_*` environment variables or harness flags.

use std::path::PathBuf;
use std::time::Duration;

use virtui_wait::WaitOpts;

use crate::browser::Browser;
use crate::machine::{Machine, SshConfig};

#[derive(Debug, Clone)]
pub struct SuiteConfig {
    /// Base URL of the machines console under test
    pub base_url: String,

    /// Browser engine driven by the suite
    pub browser: Browser,

    /// Run the browser without a visible window
    pub headless: bool,

    /// Viewport dimensions
    pub viewport_width: u32,
    pub viewport_height: u32,

    /// SSH target for the hypervisor host; `None` runs commands locally
    pub ssh: Option<SshConfig>,

    /// Delay between poll evaluations
    pub poll_delay: Duration,

    /// Deadline for a single DOM or log wait
    pub poll_timeout: Duration,

    /// Deadline for the console to start serving
    pub ready_timeout: Duration,

    /// Guests take far longer to boot than the DOM takes to settle
    pub boot_timeout: Duration,

    /// Storage pool the fixture provisions images into
    pub pool_name: String,
    pub pool_path: PathBuf,

    /// Directory the guests' serial consoles are logged to
    pub log_dir: PathBuf,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9090/machines".to_string(),
            browser: Browser::default(),
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            ssh: None,
            poll_delay: Duration::from_secs(3),
            poll_timeout: Duration::from_secs(30),
            ready_timeout: Duration::from_secs(30),
            boot_timeout: Duration::from_secs(300),
            pool_name: "default".to_string(),
            pool_path: PathBuf::from("/var/lib/libvirt/images"),
            log_dir: PathBuf::from("/var/log/libvirt/consoles"),
        }
    }
}

impl SuiteConfig {
    /// Build a config from `VIRTUI_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("VIRTUI_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(browser) = std::env::var("VIRTUI_BROWSER") {
            config.browser = Browser::parse(&browser);
        }
        if let Ok(headless) = std::env::var("VIRTUI_HEADLESS") {
            config.headless = headless != "0";
        }
        if let Ok(host) = std::env::var("VIRTUI_SSH_HOST") {
            config.ssh = Some(SshConfig {
                host,
                user: std::env::var("VIRTUI_SSH_USER").unwrap_or_else(|_| "root".to_string()),
                port: env_parse("VIRTUI_SSH_PORT").unwrap_or(22),
                identity: std::env::var("VIRTUI_SSH_KEY").ok().map(PathBuf::from),
            });
        }
        if let Some(delay) = env_secs("VIRTUI_POLL_DELAY_SECS") {
            config.poll_delay = delay;
        }
        if let Some(timeout) = env_secs("VIRTUI_POLL_TIMEOUT_SECS") {
            config.poll_timeout = timeout;
        }
        if let Some(timeout) = env_secs("VIRTUI_READY_TIMEOUT_SECS") {
            config.ready_timeout = timeout;
        }
        if let Some(timeout) = env_secs("VIRTUI_BOOT_TIMEOUT_SECS") {
            config.boot_timeout = timeout;
        }
        if let Ok(pool) = std::env::var("VIRTUI_POOL_NAME") {
            config.pool_name = pool;
        }
        if let Ok(path) = std::env::var("VIRTUI_POOL_PATH") {
            config.pool_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("VIRTUI_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        config
    }

    /// Pacing for DOM and log waits.
    pub fn dom_wait(&self) -> WaitOpts {
        WaitOpts::new()
            .delay(self.poll_delay)
            .timeout(self.poll_timeout)
    }

    /// The hypervisor host this config points at.
    pub fn machine(&self) -> Machine {
        match &self.ssh {
            Some(ssh) => Machine::ssh(ssh.clone()),
            None => Machine::local(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_secs)
}
