//! Shell execution on the hypervisor host.
//!
//! Test steps inspect command output (`virsh` state, serial console logs),
//! so execution is a plain call: run, capture stdout, fail loudly on a
//! non-zero exit. There is no timeout here; callers that expect output to
//! change over time wrap the call in a wait.

use std::path::PathBuf;

use tokio::process::Command;
use tracing::trace;

use crate::error::{HarnessError, Result};

#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity: Option<PathBuf>,
}

/// The machine running the virtualization stack under test.
#[derive(Debug, Clone)]
pub struct Machine {
    ssh: Option<SshConfig>,
}

impl Machine {
    /// Run commands on the local host. Used when the console and the
    /// hypervisor share the machine executing the suite.
    pub fn local() -> Self {
        Self { ssh: None }
    }

    /// Run commands on a remote host over SSH.
    pub fn ssh(config: SshConfig) -> Self {
        Self { ssh: Some(config) }
    }

    /// Run `cmd` through the shell and return its stdout.
    pub async fn execute(&self, cmd: &str) -> Result<String> {
        trace!(%cmd, "executing on host");
        let argv = self.argv(cmd);
        let output = Command::new(&argv[0]).args(&argv[1..]).output().await?;
        if !output.status.success() {
            return Err(HarnessError::Shell {
                cmd: cmd.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn argv(&self, cmd: &str) -> Vec<String> {
        match &self.ssh {
            None => vec!["sh".into(), "-c".into(), cmd.into()],
            Some(ssh) => {
                let mut argv: Vec<String> = vec![
                    "ssh".into(),
                    "-o".into(),
                    "BatchMode=yes".into(),
                    "-o".into(),
                    "StrictHostKeyChecking=no".into(),
                    "-p".into(),
                    ssh.port.to_string(),
                ];
                if let Some(identity) = &ssh.identity {
                    argv.push("-i".into());
                    argv.push(identity.display().to_string());
                }
                argv.push(format!("{}@{}", ssh.user, ssh.host));
                argv.push(cmd.into());
                argv
            }
        }
    }
}
