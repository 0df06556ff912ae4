//! Browser-driven test suite for the VirtUI machines console.
//!
//! The suite drives a live browser against the console, asserting on
//! rendered DOM state, and cross-checks side effects on the hypervisor
//! host through shell commands (`virsh`, serial console logs).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  test case (tests/machines.rs)                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestBed                                       fixture.rs   │
//! │    ├── create_vm() / wait_vm_complete_start() / teardown()  │
//! │    ├── BrowserSession                          browser.rs   │
//! │    │     ├── wait_css(selector, cond)          dom.rs       │
//! │    │     └── node + Playwright child process                │
//! │    └── Machine::execute(cmd) -> stdout         machine.rs   │
//! │          └── local shell or ssh                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  virtui-wait: wait(check, delay, timeout) under all of it   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod browser;
pub mod config;
pub mod dom;
pub mod error;
pub mod fixture;
pub mod machine;

pub use browser::{Browser, BrowserSession};
pub use config::SuiteConfig;
pub use dom::{Cond, Element};
pub use error::{ensure, HarnessError, Result};
pub use fixture::{TestBed, VmRecord, VmState};
pub use machine::{Machine, SshConfig};
