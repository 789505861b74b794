use std::process::Stdio;

use anyhow::{Context, Result};
use openssh::{KnownHosts, Session, SessionBuilder};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::ProxmoxConfig;
use crate::error::DeployError;

/// Captured result of a host command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Turn a non-zero exit into a [`DeployError::Tool`].
    pub fn check(self, cmd: &str) -> Result<String> {
        if self.success() {
            return Ok(self.stdout);
        }
        Err(DeployError::Tool {
            cmd: cmd.to_string(),
            code: self.code,
            stderr: self.stderr.trim().to_string(),
        }
        .into())
    }
}

const STAGE_SCRIPT: &str = "umask 077 && cat > \"$1\"";

/// Runs Proxmox CLIs either on this machine or on the PVE host over SSH.
pub enum HostRunner {
    Local,
    Ssh { session: Session, host: String },
}

impl HostRunner {
    pub async fn connect(proxmox: Option<&ProxmoxConfig>) -> Result<Self> {
        let Some(cfg) = proxmox else {
            if which::which("pct").is_err() {
                anyhow::bail!(
                    "`pct` not found on this machine. Run on the Proxmox host or add a [proxmox] section."
                );
            }
            return Ok(Self::Local);
        };

        debug!("Connecting to {}@{}", cfg.user, cfg.host);

        let mut builder = SessionBuilder::default();
        builder.known_hosts_check(KnownHosts::Accept);
        builder.user(cfg.user.clone());

        if let Some(port) = cfg.port {
            builder.port(port);
        }

        let session = builder
            .connect(&cfg.host)
            .await
            .with_context(|| format!("Failed to connect to {}@{}", cfg.user, cfg.host))?;

        Ok(Self::Ssh {
            session,
            host: cfg.host.clone(),
        })
    }

    pub fn host(&self) -> &str {
        match self {
            Self::Local => "localhost",
            Self::Ssh { host, .. } => host,
        }
    }

    /// Run `program args...`, optionally feeding `stdin`. Never fails on a
    /// non-zero exit; see [`CmdOutput::check`].
    pub async fn output(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<CmdOutput> {
        debug!("[{}] {} {}", self.host(), program, args.join(" "));

        match self {
            Self::Local => {
                let mut child = tokio::process::Command::new(program)
                    .args(args)
                    .stdin(if stdin.is_some() {
                        Stdio::piped()
                    } else {
                        Stdio::null()
                    })
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .with_context(|| format!("Failed to spawn {}", program))?;

                if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
                    pipe.write_all(data)
                        .await
                        .context("Failed to write to command stdin")?;
                }

                let out = child
                    .wait_with_output()
                    .await
                    .with_context(|| format!("Failed to wait for {}", program))?;

                Ok(CmdOutput {
                    code: out.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                })
            }
            Self::Ssh { session, host } => {
                let mut child = session
                    .command(program)
                    .args(args)
                    .stdin(if stdin.is_some() {
                        openssh::Stdio::piped()
                    } else {
                        openssh::Stdio::null()
                    })
                    .stdout(openssh::Stdio::piped())
                    .stderr(openssh::Stdio::piped())
                    .spawn()
                    .await
                    .with_context(|| format!("Failed to execute {} on {}", program, host))?;

                if let (Some(data), Some(mut pipe)) = (stdin, child.stdin().take()) {
                    pipe.write_all(data)
                        .await
                        .context("Failed to write to remote stdin")?;
                }

                let out = child
                    .wait_with_output()
                    .await
                    .with_context(|| format!("Failed to wait for {} on {}", program, host))?;

                Ok(CmdOutput {
                    code: out.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                })
            }
        }
    }

    /// Run and return stdout, failing on non-zero exit.
    pub async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let cmd = format!("{} {}", program, args.join(" "));
        self.output(program, args, None).await?.check(&cmd)
    }

    /// Copy `content` to a temporary file on the PVE host and return its path.
    pub async fn stage_file(&self, content: &[u8]) -> Result<String> {
        self.stage_with("/tmp/pvestack.XXXXXX", STAGE_SCRIPT, content)
            .await
    }

    async fn stage_with(&self, template: &str, script: &str, content: &[u8]) -> Result<String> {
        let path = self
            .run("mktemp", &[template.to_string()])
            .await
            .context("Failed to create temporary file on host")?
            .trim()
            .to_string();

        let args = vec![
            "-c".to_string(),
            script.to_string(),
            "sh".to_string(),
            path.clone(),
        ];
        let staged = match self.output("sh", &args, Some(content)).await {
            Ok(out) => out.check("stage temporary file"),
            Err(e) => Err(e),
        };
        if let Err(e) = staged {
            if let Err(rm) = self.remove_file(&path).await {
                warn!("Failed to remove {} on host: {:#}", path, rm);
            }
            return Err(e);
        }

        Ok(path)
    }

    pub async fn remove_file(&self, path: &str) -> Result<()> {
        self.run("rm", &["-f".to_string(), path.to_string()]).await?;
        Ok(())
    }

    pub async fn close(self) -> Result<()> {
        if let Self::Ssh { session, host } = self {
            session
                .close()
                .await
                .with_context(|| format!("Failed to close SSH session to {}", host))?;
        }
        Ok(())
    }
}
