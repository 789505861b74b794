//! Backup server configuration as an explicit state machine.
//!
//! Every state is derived from what the server reports, so a rerun against a
//! configured server walks straight to [`BackupState::JobsConfigured`] without
//! changing anything.

pub mod credentials;
pub mod monitoring;
pub mod pbs;

use std::fmt;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::BackupConfig;
use crate::deploy::context::DeployContext;
use crate::output;
use crate::pve::ContainerRuntime;
use crate::secrets::Prompt;
use credentials::Credentials;
use pbs::JobKind;

pub const ADMIN_PASSWORD_MIN_LEN: usize = 12;
const PROMETHEUS_PASSWORD_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupState {
    ServiceNotReady,
    AdminPasswordUnset,
    AdminPasswordSet,
    PrometheusUserUnset,
    PrometheusUserSet,
    DatastoreAbsent,
    DatastorePresent,
    JobsAbsent,
    JobsConfigured,
}

impl fmt::Display for BackupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupState::ServiceNotReady => "service not ready",
            BackupState::AdminPasswordUnset => "admin password unset",
            BackupState::AdminPasswordSet => "admin password set",
            BackupState::PrometheusUserUnset => "prometheus user missing",
            BackupState::PrometheusUserSet => "prometheus user present",
            BackupState::DatastoreAbsent => "datastore absent",
            BackupState::DatastorePresent => "datastore present",
            BackupState::JobsAbsent => "jobs missing",
            BackupState::JobsConfigured => "jobs configured",
        };
        write!(f, "{}", s)
    }
}

struct Configurator<'a, R, P> {
    runtime: &'a R,
    prompt: &'a mut P,
    ctx: &'a DeployContext,
    backup: &'a BackupConfig,
    creds: Credentials,
}

/// Drive the backup server from whatever state it is in to fully configured,
/// then register it with the monitoring stack. Returns the states visited.
pub async fn run<R, P>(runtime: &R, prompt: &mut P, ctx: &DeployContext) -> Result<Vec<BackupState>>
where
    R: ContainerRuntime,
    P: Prompt,
{
    let mut machine = Configurator {
        runtime,
        prompt,
        ctx,
        backup: ctx.registry.backup()?,
        creds: Credentials::new(&ctx.state_dir),
    };

    let mut state = BackupState::ServiceNotReady;
    let mut trail = vec![state];

    while state != BackupState::JobsConfigured {
        let next = machine.advance(state).await?;
        debug!("backup server: {} -> {}", state, next);
        state = next;
        trail.push(state);
    }

    monitoring::register(runtime, ctx, &machine.creds).await?;

    Ok(trail)
}

impl<R: ContainerRuntime, P: Prompt> Configurator<'_, R, P> {
    fn id(&self) -> u32 {
        self.ctx.id()
    }

    async fn advance(&mut self, state: BackupState) -> Result<BackupState> {
        match state {
            BackupState::ServiceNotReady => {
                self.ensure_installed().await?;
                self.wait_ready().await?;
                if self.creds.admin_password_recorded() && !self.ctx.rotate_admin {
                    if !self.creds.admin_password_consistent()? {
                        output::warning(
                            "Stored admin password does not match its hash, use --rotate-admin to reset it",
                        );
                    }
                    output::success("Admin password already set");
                    Ok(BackupState::AdminPasswordSet)
                } else {
                    Ok(BackupState::AdminPasswordUnset)
                }
            }
            BackupState::AdminPasswordUnset => {
                self.set_admin_password().await?;
                Ok(BackupState::AdminPasswordSet)
            }
            BackupState::AdminPasswordSet => {
                let users: Vec<pbs::User> = self.list("user").await?;
                if pbs::has_user(&users, pbs::PROMETHEUS_USER) {
                    output::success(&format!("User {} exists", pbs::PROMETHEUS_USER));
                    Ok(BackupState::PrometheusUserSet)
                } else {
                    Ok(BackupState::PrometheusUserUnset)
                }
            }
            BackupState::PrometheusUserUnset => {
                self.create_prometheus_user().await?;
                Ok(BackupState::PrometheusUserSet)
            }
            BackupState::PrometheusUserSet => {
                if self.datastore_listed().await? {
                    output::success(&format!("Datastore '{}' exists", self.backup.datastore));
                    Ok(BackupState::DatastorePresent)
                } else {
                    Ok(BackupState::DatastoreAbsent)
                }
            }
            BackupState::DatastoreAbsent => {
                self.create_datastore().await?;
                Ok(BackupState::DatastorePresent)
            }
            BackupState::DatastorePresent => {
                self.runtime
                    .exec(self.id(), &pbs::acl_cmd(&self.backup.datastore))
                    .await
                    .context("Failed to grant datastore audit permission")?;
                if self.missing_jobs().await?.is_empty() {
                    output::success("Prune and verify jobs exist");
                    Ok(BackupState::JobsConfigured)
                } else {
                    Ok(BackupState::JobsAbsent)
                }
            }
            BackupState::JobsAbsent => {
                for kind in self.missing_jobs().await? {
                    self.create_job(kind).await?;
                }
                Ok(BackupState::JobsConfigured)
            }
            BackupState::JobsConfigured => Ok(BackupState::JobsConfigured),
        }
    }

    async fn ensure_installed(&self) -> Result<()> {
        let id = self.id();
        if self
            .runtime
            .exec_ok(id, &format!("command -v {}", pbs::MANAGER))
            .await?
        {
            debug!("{} present in container {}", pbs::MANAGER, id);
            return Ok(());
        }

        let spinner = output::spinner("Installing proxmox-backup-server...");
        let installed = self.runtime.exec(id, pbs::INSTALL).await;
        spinner.finish_and_clear();
        installed.context("Failed to install proxmox-backup-server")?;

        output::success("Installed proxmox-backup-server");
        Ok(())
    }

    async fn wait_ready(&self) -> Result<()> {
        let id = self.id();
        let runtime = self.runtime;
        let spinner = output::spinner("Waiting for backup service...");

        let ready = self
            .ctx
            .timings
            .service_ready
            .run("service failed to start", |_| async move {
                anyhow::Ok(
                    runtime
                        .exec_ok(id, &pbs::is_active_cmd())
                        .await?
                        .then_some(()),
                )
            })
            .await;

        spinner.finish_and_clear();
        ready.with_context(|| format!("{} is not active", pbs::PROXY_SERVICE))?;
        output::success("Backup service is active");
        Ok(())
    }

    async fn set_admin_password(&mut self) -> Result<()> {
        let password = self
            .prompt
            .new_password("backup server admin password", ADMIN_PASSWORD_MIN_LEN)
            .await?;

        let line = format!("{}:{}\n", pbs::ADMIN_USER, password);
        self.runtime
            .exec_with_stdin(self.id(), "chpasswd", Some(line.as_bytes()))
            .await?
            .check("chpasswd")
            .context("Failed to set admin password")?;

        self.creds.save_admin_password(&password)?;
        output::success("Admin password set");
        Ok(())
    }

    async fn list<T: DeserializeOwned>(&self, subcommand: &str) -> Result<Vec<T>> {
        let stdout = self
            .runtime
            .exec(self.id(), &pbs::list_cmd(subcommand))
            .await
            .with_context(|| format!("Failed to list {}s", subcommand))?;
        pbs::parse_list(subcommand, &stdout)
    }

    async fn create_prometheus_user(&self) -> Result<()> {
        let password = credentials::random_password(PROMETHEUS_PASSWORD_LEN);
        let line = format!("{}\n", password);

        self.runtime
            .exec_with_stdin(self.id(), &pbs::create_user_cmd(), Some(line.as_bytes()))
            .await?
            .check(&format!("{} user create {}", pbs::MANAGER, pbs::PROMETHEUS_USER))
            .context("Failed to create prometheus user")?;

        self.creds.save_prometheus_password(&password)?;
        output::success(&format!("Created user {}", pbs::PROMETHEUS_USER));
        Ok(())
    }

    async fn datastore_listed(&self) -> Result<bool> {
        let stores: Vec<pbs::Datastore> = self.list("datastore").await?;
        Ok(pbs::has_datastore(&stores, &self.backup.datastore))
    }

    /// Leftovers of an earlier failed attempt make `datastore create` refuse
    /// the directory. Only reached when the service does not know the store.
    async fn clear_stray_entries(&self) -> Result<()> {
        let id = self.id();
        let path = &self.backup.datastore_path;

        if !self.runtime.exec_ok(id, &format!("test -d {}", path)).await? {
            return Ok(());
        }
        if self
            .runtime
            .path_exists(id, &format!("{}/{}", path, pbs::GC_STATUS))
            .await?
        {
            debug!("{} has {}, leaving it alone", path, pbs::GC_STATUS);
            return Ok(());
        }

        let count = self.runtime.exec(id, &pbs::count_entries_cmd(path)).await?;
        if count.trim() == "0" {
            return Ok(());
        }

        output::warning(&format!(
            "Clearing {} stray entries in {}",
            count.trim(),
            path
        ));
        self.runtime
            .exec(id, &pbs::clear_dir_cmd(path))
            .await
            .with_context(|| format!("Failed to clear {}", path))?;
        Ok(())
    }

    async fn create_datastore(&self) -> Result<()> {
        self.clear_stray_entries().await?;

        let name = &self.backup.datastore;
        let cmd = pbs::create_datastore_cmd(name, &self.backup.datastore_path);
        let spinner = output::spinner(&format!("Creating datastore '{}'...", name));

        let this = self;
        let cmd = cmd.as_str();
        let created = self
            .ctx
            .timings
            .datastore_create
            .run(&format!("datastore '{}' creation", name), |attempt| async move {
                let out = this.runtime.exec_raw(this.id(), cmd).await?;
                if out.success() {
                    return anyhow::Ok(Some(()));
                }
                debug!(
                    "datastore create attempt {} failed: {}",
                    attempt,
                    out.stderr.trim()
                );
                // a timed-out call may still have registered the store
                Ok(this.datastore_listed().await?.then_some(()))
            })
            .await;

        spinner.finish_and_clear();
        created?;
        info!("Datastore {} at {}", name, self.backup.datastore_path);
        output::success(&format!("Created datastore '{}'", name));
        Ok(())
    }

    async fn missing_jobs(&self) -> Result<Vec<JobKind>> {
        let mut missing = Vec::new();
        for kind in JobKind::ALL {
            let jobs: Vec<pbs::Job> = self.list(kind.subcommand()).await?;
            if !pbs::has_job(&jobs, kind, &self.backup.datastore) {
                missing.push(kind);
            }
        }
        Ok(missing)
    }

    async fn create_job(&self, kind: JobKind) -> Result<()> {
        let schedule = match kind {
            JobKind::Prune => &self.backup.prune_schedule,
            JobKind::Verify => &self.backup.verify_schedule,
        };
        self.runtime
            .exec(self.id(), &kind.create_cmd(&self.backup.datastore, schedule))
            .await
            .with_context(|| format!("Failed to create {}", kind.subcommand()))?;
        output::success(&format!(
            "Created {} {} ({})",
            kind.subcommand(),
            kind.job_id(&self.backup.datastore),
            schedule
        ));
        Ok(())
    }
}
