//! Per-case fixture: one browser session, one hypervisor connection, and
//! the VMs provisioned for the case.
//!
//! The fixture owns the browser for exactly one test case. Teardown is
//! explicit and destroys everything the fixture created; the browser child
//! is additionally killed on drop so a panicking case cannot leak it.

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};
use virtui_wait::{wait, CheckError, WaitError, WaitOpts};

use crate::browser::BrowserSession;
use crate::config::SuiteConfig;
use crate::dom::Cond;
use crate::error::{HarnessError, Result};
use crate::machine::Machine;

/// Provisioning record for one VM created through the fixture.
#[derive(Debug, Clone)]
pub struct VmRecord {
    pub name: String,
    pub image: PathBuf,
    pub logfile: PathBuf,
    pub pool_name: String,
    pub pool_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Running,
    ShutOff,
}

pub struct TestBed {
    pub browser: BrowserSession,
    pub machine: Machine,
    config: SuiteConfig,
    vms: Vec<VmRecord>,
}

impl TestBed {
    /// Bring the fixture up: wait for the console to serve, start a
    /// browser, and open the machines page.
    pub async fn setup(config: SuiteConfig) -> Result<Self> {
        let machine = config.machine();
        wait_console_ready(&config).await?;
        let browser = BrowserSession::launch(&config).await?;
        browser.goto(&config.base_url).await?;
        Ok(Self {
            browser,
            machine,
            config,
            vms: Vec::new(),
        })
    }

    /// Define a VM through virsh and wait for the console to show its row.
    pub async fn create_vm(
        &mut self,
        name: &str,
        state: VmState,
        wait_boot: bool,
    ) -> Result<VmRecord> {
        let record = VmRecord {
            name: name.to_string(),
            image: self.config.pool_path.join(format!("{name}.qcow2")),
            logfile: self.config.log_dir.join(format!("{name}.log")),
            pool_name: self.config.pool_name.clone(),
            pool_path: self.config.pool_path.clone(),
        };
        info!(vm = name, ?state, "provisioning VM");

        self.machine
            .execute(&format!(
                "sudo qemu-img create -f qcow2 {} 256M",
                record.image.display()
            ))
            .await?;

        let xml = domain_xml(&record);
        self.machine
            .execute(&format!(
                "sudo tee /tmp/{name}.xml >/dev/null <<'EOF'\n{xml}\nEOF"
            ))
            .await?;
        self.machine
            .execute(&format!("sudo virsh define /tmp/{name}.xml"))
            .await?;
        let _ = self
            .machine
            .execute(&format!("sudo virsh pool-refresh {}", record.pool_name))
            .await;
        if state == VmState::Running {
            self.machine
                .execute(&format!("sudo virsh start {name}"))
                .await?;
        }
        self.vms.push(record.clone());

        self.browser
            .wait_css(&format!("#vm-{name}-row"), Cond::Present)
            .await?;
        if wait_boot {
            self.wait_vm_complete_start(&record).await?;
        }
        Ok(record)
    }

    /// Block until the guest's serial console shows a login prompt.
    pub async fn wait_vm_complete_start(&self, vm: &VmRecord) -> Result<()> {
        self.wait_log(vm, self.config.boot_timeout, |log| log.contains("login:"))
            .await
            .map_err(|err| timeout_context(err, format!("{} to finish booting", vm.name)))
    }

    /// Poll the VM's serial console log until it contains `needle`.
    pub async fn wait_log_contains(&self, vm: &VmRecord, needle: &str) -> Result<()> {
        self.wait_log(vm, self.config.poll_timeout, |log| log.contains(needle))
            .await
            .map_err(|err| {
                timeout_context(err, format!("'{needle}' in {}", vm.logfile.display()))
            })
    }

    /// Poll the VM's serial console log until `pattern` matches it.
    pub async fn wait_log_matches(&self, vm: &VmRecord, pattern: &Regex) -> Result<()> {
        self.wait_log(vm, self.config.poll_timeout, |log| pattern.is_match(log))
            .await
            .map_err(|err| {
                timeout_context(err, format!("/{pattern}/ in {}", vm.logfile.display()))
            })
    }

    async fn wait_log(
        &self,
        vm: &VmRecord,
        timeout: Duration,
        matches: impl Fn(&str) -> bool,
    ) -> Result<()> {
        let cmd = format!("sudo cat {}", vm.logfile.display());
        let opts = self.config.dom_wait().timeout(timeout);
        let matches = &matches;
        wait(&opts, || {
            let cmd = cmd.clone();
            async move {
                match self.machine.execute(&cmd).await {
                    Ok(log) => Ok(matches(&log).then_some(())),
                    // The logfile only exists once the guest starts writing
                    // to it.
                    Err(HarnessError::Shell { stderr, .. }) => Err(CheckError::NotFound(stderr)),
                    Err(err) => Err(CheckError::Fatal(err.into())),
                }
            }
        })
        .await
        .map_err(HarnessError::from)
    }

    /// Poll until `path` no longer exists on the host.
    pub async fn wait_path_gone(&self, path: &str) -> Result<()> {
        let cmd = format!("sudo test -e {path}");
        let opts = self.config.dom_wait();
        wait(&opts, || {
            let cmd = cmd.clone();
            async move {
                match self.machine.execute(&cmd).await {
                    Ok(_) => Ok(None),
                    Err(HarnessError::Shell { .. }) => Ok(Some(())),
                    Err(err) => Err(CheckError::Fatal(err.into())),
                }
            }
        })
        .await
        .map_err(|err| timeout_context(HarnessError::from(err), format!("{path} to be removed")))
    }

    /// Destroy every VM this fixture created and shut the browser down.
    pub async fn teardown(mut self) -> Result<()> {
        for vm in std::mem::take(&mut self.vms) {
            if let Err(err) = self.destroy_vm(&vm).await {
                warn!(vm = %vm.name, %err, "cleanup failed");
            }
        }
        self.browser.close().await
    }

    async fn destroy_vm(&self, vm: &VmRecord) -> Result<()> {
        let name = &vm.name;
        debug!(vm = %name, "destroying VM");
        // Already shut off is fine.
        let _ = self
            .machine
            .execute(&format!("sudo virsh destroy {name}"))
            .await;
        self.machine
            .execute(&format!("sudo virsh undefine {name}"))
            .await?;
        self.machine
            .execute(&format!(
                "sudo rm -f {} {} /tmp/{name}.xml",
                vm.image.display(),
                vm.logfile.display()
            ))
            .await?;
        let _ = self
            .machine
            .execute(&format!("sudo virsh pool-refresh {}", vm.pool_name))
            .await;
        Ok(())
    }
}

/// Poll the console URL until it answers with a success status.
async fn wait_console_ready(config: &SuiteConfig) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;
    let opts = WaitOpts::new()
        .delay(Duration::from_millis(500))
        .timeout(config.ready_timeout);

    wait(&opts, || {
        let client = client.clone();
        let url = config.base_url.clone();
        async move {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => Ok(Some(())),
                Ok(resp) => {
                    warn!(status = %resp.status(), "console not ready");
                    Ok(None)
                }
                // Connection refused is expected while the console starts.
                Err(err) if err.is_connect() => Err(CheckError::NotFound(err.to_string())),
                Err(err) => {
                    warn!(%err, "console readiness check failed");
                    Ok(None)
                }
            }
        }
    })
    .await
    .map_err(|err| {
        timeout_context(
            HarnessError::from(err),
            format!("console at {}", config.base_url),
        )
    })
}

fn timeout_context(err: HarnessError, what: String) -> HarnessError {
    match err {
        HarnessError::Wait(source @ WaitError::Timeout { .. }) => {
            HarnessError::Timeout { what, source }
        }
        other => other,
    }
}

/// Libvirt domain definition for a fixture VM: 256 MiB of memory, one
/// vCPU, a custom CPU model, the `pc` machine, boot order disk,network,
/// and a serial console logged to the record's logfile.
fn domain_xml(vm: &VmRecord) -> String {
    format!(
        r#"<domain type='qemu'>
  <name>{name}</name>
  <memory unit='MiB'>256</memory>
  <vcpu>1</vcpu>
  <os>
    <type arch='x86_64' machine='pc'>hvm</type>
    <boot dev='hd'/>
    <boot dev='network'/>
  </os>
  <cpu mode='custom' match='exact'>
    <model fallback='allow'>qemu64</model>
  </cpu>
  <devices>
    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='{image}'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <interface type='network'>
      <source network='default'/>
    </interface>
    <serial type='file'>
      <source path='{logfile}'/>
      <target port='0'/>
    </serial>
    <console type='file'>
      <source path='{logfile}'/>
      <target type='serial' port='0'/>
    </console>
  </devices>
</domain>"#,
        name = vm.name,
        image = vm.image.display(),
        logfile = vm.logfile.display(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> VmRecord {
        VmRecord {
            name: "staticvm".to_string(),
            image: PathBuf::from("/var/lib/libvirt/images/staticvm.qcow2"),
            logfile: PathBuf::from("/var/log/libvirt/consoles/staticvm.log"),
            pool_name: "default".to_string(),
            pool_path: PathBuf::from("/var/lib/libvirt/images"),
        }
    }

    #[test]
    fn domain_xml_matches_the_overview_values() {
        let xml = domain_xml(&record());
        assert!(xml.contains("<name>staticvm</name>"));
        assert!(xml.contains("<memory unit='MiB'>256</memory>"));
        assert!(xml.contains("<vcpu>1</vcpu>"));
        assert!(xml.contains("machine='pc'"));
        assert!(xml.contains("<cpu mode='custom'"));
        assert!(xml.contains("<boot dev='hd'/>"));
        assert!(xml.contains("<boot dev='network'/>"));
    }

    #[test]
    fn domain_xml_logs_the_serial_console() {
        let xml = domain_xml(&record());
        assert!(xml.contains("<source path='/var/log/libvirt/consoles/staticvm.log'/>"));
        assert!(xml.contains("<source file='/var/lib/libvirt/images/staticvm.qcow2'/>"));
    }

    #[test]
    fn timeout_context_only_rewraps_timeouts() {
        let timeout = HarnessError::Wait(WaitError::Timeout {
            elapsed: Duration::from_secs(30),
            last: virtui_wait::Observed::NoMatch,
        });
        match timeout_context(timeout, "the row".to_string()) {
            HarnessError::Timeout { what, .. } => assert_eq!(what, "the row"),
            other => panic!("expected timeout, got {other}"),
        }

        let fatal = HarnessError::Driver("boom".to_string());
        assert!(matches!(
            timeout_context(fatal, "the row".to_string()),
            HarnessError::Driver(_)
        ));
    }
}
