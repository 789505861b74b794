use std::cmp::Ordering;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::runner::{CmdOutput, HostRunner};
use super::{ContainerRuntime, ContainerState, CreateSpec, OsFamily};
use crate::error::DeployError;

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// [`ContainerRuntime`] backed by `pct` and `pveam`.
pub struct Pct {
    runner: HostRunner,
}

impl Pct {
    pub fn new(runner: HostRunner) -> Self {
        Self { runner }
    }

    pub fn host(&self) -> &str {
        self.runner.host()
    }

    pub async fn close(self) -> Result<()> {
        self.runner.close().await
    }
}

impl ContainerRuntime for Pct {
    async fn state(&self, id: u32) -> Result<ContainerState> {
        let out = self
            .runner
            .output("pct", &args(["status", &id.to_string()]), None)
            .await?;
        parse_status(id, &out)
    }

    async fn latest_template(&self, family: OsFamily) -> Result<String> {
        // A stale index only means an older image; keep going.
        if let Err(e) = self.runner.run("pveam", &args(["update"])).await {
            warn!("pveam update failed: {:#}", e);
        }

        let listing = self
            .runner
            .run("pveam", &args(["available", "--section", "system"]))
            .await
            .context("Failed to list available templates")?;

        pick_latest(&listing, family.template_prefix()).ok_or_else(|| {
            DeployError::config(format!(
                "no template matching '{}' in pveam available",
                family.template_prefix()
            ))
            .into()
        })
    }

    async fn ensure_template(&self, storage: &str, template: &str) -> Result<bool> {
        let cached = self
            .runner
            .run("pveam", &args(["list", storage]))
            .await
            .context("Failed to list cached templates")?;

        if cached.lines().any(|line| line.contains(template)) {
            debug!("Template {} already cached in {}", template, storage);
            return Ok(false);
        }

        self.runner
            .run("pveam", &args(["download", storage, template]))
            .await
            .with_context(|| format!("Failed to download template {}", template))?;
        Ok(true)
    }

    async fn create(&self, spec: &CreateSpec) -> Result<()> {
        self.runner
            .run("pct", &create_args(spec))
            .await
            .with_context(|| format!("Failed to create container {}", spec.id))?;
        Ok(())
    }

    async fn attach_mount(&self, id: u32, host_path: &str, mount_path: &str) -> Result<()> {
        let mp = format!("{},mp={}", host_path, mount_path);
        self.runner
            .run("pct", &args(["set", &id.to_string(), "--mp0", &mp]))
            .await
            .with_context(|| format!("Failed to attach {} to container {}", host_path, id))?;
        Ok(())
    }

    async fn start(&self, id: u32) -> Result<()> {
        self.runner
            .run("pct", &args(["start", &id.to_string()]))
            .await
            .with_context(|| format!("Failed to start container {}", id))?;
        Ok(())
    }

    async fn exec_with_stdin(
        &self,
        id: u32,
        cmd: &str,
        stdin: Option<&[u8]>,
    ) -> Result<CmdOutput> {
        self.runner
            .output("pct", &args(["exec", &id.to_string(), "--", "sh", "-c", cmd]), stdin)
            .await
    }

    async fn push(&self, id: u32, content: &[u8], target: &str, mode: Option<u32>) -> Result<()> {
        if let Some(parent) = target.rsplit_once('/').map(|(dir, _)| dir) {
            if !parent.is_empty() {
                self.exec(id, &format!("mkdir -p '{}'", parent)).await?;
            }
        }

        let staged = self.runner.stage_file(content).await?;

        let mut push_args = args(["push", &id.to_string(), &staged, target]);
        if let Some(mode) = mode {
            push_args.push("--perms".to_string());
            push_args.push(format!("{:o}", mode));
        }
        let pushed = self.runner.run("pct", &push_args).await;

        // Host copy goes regardless of how the push went.
        self.runner.remove_file(&staged).await?;

        pushed.with_context(|| format!("Failed to push {} into container {}", target, id))?;
        Ok(())
    }
}

/// Interpret `pct status <id>`.
pub fn parse_status(id: u32, out: &CmdOutput) -> Result<ContainerState> {
    if !out.success() {
        if out.stderr.contains("does not exist") {
            return Ok(ContainerState::Absent);
        }
        return out
            .clone()
            .check(&format!("pct status {}", id))
            .map(|_| ContainerState::Absent);
    }

    match out.stdout.trim().strip_prefix("status:").map(str::trim) {
        Some("running") => Ok(ContainerState::Running),
        Some(_) => Ok(ContainerState::Created),
        None => anyhow::bail!("Unexpected pct status output: {}", out.stdout.trim()),
    }
}

pub fn create_args(spec: &CreateSpec) -> Vec<String> {
    vec![
        "create".to_string(),
        spec.id.to_string(),
        spec.template.clone(),
        "--ostype".to_string(),
        spec.ostype.clone(),
        "--hostname".to_string(),
        spec.hostname.clone(),
        "--cores".to_string(),
        spec.cores.to_string(),
        "--memory".to_string(),
        spec.memory_mb.to_string(),
        "--swap".to_string(),
        spec.swap_mb.to_string(),
        "--rootfs".to_string(),
        format!("{}:{}", spec.rootfs_storage, spec.disk_gb),
        "--net0".to_string(),
        format!(
            "name=eth0,bridge={},ip={},gw={}",
            spec.bridge, spec.ip_cidr, spec.gateway
        ),
        "--unprivileged".to_string(),
        "1".to_string(),
        "--features".to_string(),
        "nesting=1,keyctl=1".to_string(),
        "--onboot".to_string(),
        "1".to_string(),
    ]
}

/// Newest template in a `pveam available` listing whose name starts with `prefix`.
pub fn pick_latest(listing: &str, prefix: &str) -> Option<String> {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter(|name| name.starts_with(prefix))
        .max_by(|a, b| natural_cmp(a, b))
        .map(str::to_string)
}

/// Compare with digit runs ordered numerically, so `3.9` < `3.19`.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a, b);
    loop {
        match (a.is_empty(), b.is_empty()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }

        let a_digit = a.starts_with(|c: char| c.is_ascii_digit());
        let b_digit = b.starts_with(|c: char| c.is_ascii_digit());
        let split = |s: &str, digit: bool| -> usize {
            s.find(|c: char| c.is_ascii_digit() != digit).unwrap_or(s.len())
        };

        let (ra, rb) = (split(a, a_digit), split(b, b_digit));
        let (ca, cb) = (&a[..ra], &b[..rb]);

        let ord = if a_digit && b_digit {
            let na = ca.trim_start_matches('0');
            let nb = cb.trim_start_matches('0');
            na.len().cmp(&nb.len()).then_with(|| na.cmp(nb))
        } else {
            ca.cmp(cb)
        };

        if ord != Ordering::Equal {
            return ord;
        }
        a = &a[ra..];
        b = &b[rb..];
    }
}
