//! Container control surface.
//!
//! Everything the deployment does to a container goes through
//! [`ContainerRuntime`]; [`pct::Pct`] is the real implementation on top of the
//! Proxmox CLIs.

#![allow(async_fn_in_trait)]

pub mod os;
pub mod pct;
pub mod runner;

#[cfg(test)]
pub mod fake;

use anyhow::Result;

pub use os::OsFamily;
pub use runner::CmdOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Absent,
    /// Exists but is not running.
    Created,
    Running,
}

/// Parameters for `pct create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSpec {
    pub id: u32,
    /// Volume id of the template, e.g. `local:vztmpl/alpine-3.20-default_20240908_amd64.tar.xz`
    pub template: String,
    pub ostype: String,
    pub hostname: String,
    pub cores: u32,
    pub memory_mb: u32,
    pub swap_mb: u32,
    pub rootfs_storage: String,
    pub disk_gb: u32,
    pub bridge: String,
    pub ip_cidr: String,
    pub gateway: String,
}

pub trait ContainerRuntime {
    async fn state(&self, id: u32) -> Result<ContainerState>;

    /// Newest template available for `family`.
    async fn latest_template(&self, family: OsFamily) -> Result<String>;

    /// Download `template` into `storage` unless cached. Returns true if downloaded.
    async fn ensure_template(&self, storage: &str, template: &str) -> Result<bool>;

    async fn create(&self, spec: &CreateSpec) -> Result<()>;

    async fn attach_mount(&self, id: u32, host_path: &str, mount_path: &str) -> Result<()>;

    async fn start(&self, id: u32) -> Result<()>;

    /// Run `cmd` through `sh -c` inside the container.
    async fn exec_with_stdin(&self, id: u32, cmd: &str, stdin: Option<&[u8]>)
        -> Result<CmdOutput>;

    /// Write `content` to `target` inside the container.
    async fn push(&self, id: u32, content: &[u8], target: &str, mode: Option<u32>) -> Result<()>;

    async fn exec_raw(&self, id: u32, cmd: &str) -> Result<CmdOutput> {
        self.exec_with_stdin(id, cmd, None).await
    }

    /// Run and return stdout; non-zero exit is a tool error.
    async fn exec(&self, id: u32, cmd: &str) -> Result<String> {
        self.exec_raw(id, cmd)
            .await?
            .check(&format!("pct exec {} -- {}", id, cmd))
    }

    /// Ok(true) on exit 0, Ok(false) otherwise.
    async fn exec_ok(&self, id: u32, cmd: &str) -> Result<bool> {
        Ok(self.exec_raw(id, cmd).await?.success())
    }

    async fn path_exists(&self, id: u32, path: &str) -> Result<bool> {
        self.exec_ok(id, &format!("test -e {}", path)).await
    }
}
