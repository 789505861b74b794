use anyhow::{Context, Result};
use minijinja::Environment;
use tracing::debug;

use super::credentials::Credentials;
use super::pbs;
use crate::deploy::context::DeployContext;
use crate::output;
use crate::pve::{ContainerRuntime, ContainerState};

const TARGETS_TEMPLATE: &str = include_str!("../../templates/pbs-targets.yml.j2");
const EXPORTER_ENV_TEMPLATE: &str = include_str!("../../templates/pbs-exporter.env.j2");

/// Scrape address of the exporter service inside the monitoring stack.
const EXPORTER_TARGET: &str = "pbs-exporter:10019";

#[derive(Debug, PartialEq, Eq)]
pub enum Registration {
    Registered,
    /// No monitoring stack configured or its container does not exist.
    Skipped,
}

pub fn targets_path(app_dir: &str) -> String {
    format!("{}/prometheus/targets/pbs.yml", app_dir)
}

pub fn exporter_env_path(app_dir: &str) -> String {
    format!("{}/pbs-exporter.env", app_dir)
}

pub fn render_targets(ctx: &DeployContext, datastore: &str) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("pbs-targets", TARGETS_TEMPLATE)?;
    let tmpl = env.get_template("pbs-targets")?;
    Ok(tmpl.render(minijinja::context! {
        exporter_target => EXPORTER_TARGET,
        hostname => &ctx.stack.hostname,
        datastore => datastore,
    })?)
}

fn render_exporter_env(ctx: &DeployContext, password: &str) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("pbs-exporter", EXPORTER_ENV_TEMPLATE)?;
    let tmpl = env.get_template("pbs-exporter")?;
    Ok(tmpl.render(minijinja::context! {
        ip => ctx.ip(),
        username => pbs::PROMETHEUS_USER,
        password => password,
    })?)
}

/// Point the monitoring stack's Prometheus at this backup server.
///
/// A missing monitoring stack is not an error.
pub async fn register<R: ContainerRuntime>(
    runtime: &R,
    ctx: &DeployContext,
    creds: &Credentials,
) -> Result<Registration> {
    let backup = ctx.registry.backup()?;

    let Some(stack_name) = backup.monitoring_stack.as_deref() else {
        debug!("No monitoring stack configured");
        return Ok(Registration::Skipped);
    };

    let Ok(monitoring) = ctx.registry.stack(stack_name) else {
        output::warning(&format!(
            "Monitoring stack '{}' is not in the registry, skipping scrape target",
            stack_name
        ));
        return Ok(Registration::Skipped);
    };

    let id = monitoring.container_id;
    match runtime.state(id).await? {
        ContainerState::Running => {}
        ContainerState::Created => {
            output::warning(&format!(
                "Monitoring container {} is stopped, skipping scrape target",
                id
            ));
            return Ok(Registration::Skipped);
        }
        ContainerState::Absent => {
            output::warning(&format!(
                "Monitoring container {} does not exist yet, skipping scrape target",
                id
            ));
            return Ok(Registration::Skipped);
        }
    }

    let app_dir = monitoring.app_dir();

    let targets = render_targets(ctx, &backup.datastore)?;
    runtime
        .push(id, targets.as_bytes(), &targets_path(&app_dir), None)
        .await
        .context("Failed to push Prometheus scrape target")?;

    match creds.prometheus_password() {
        Some(password) => {
            let env = render_exporter_env(ctx, &password)?;
            runtime
                .push(id, env.as_bytes(), &exporter_env_path(&app_dir), Some(0o600))
                .await
                .context("Failed to push exporter credentials")?;
        }
        None => output::warning(
            "No local password for prometheus@pbs, exporter credentials not updated",
        ),
    }

    runtime
        .exec(id, &format!("cd {} && docker compose restart prometheus", app_dir))
        .await
        .context("Failed to restart prometheus")?;

    output::success(&format!("Registered {} with monitoring stack '{}'", ctx.stack.hostname, stack_name));
    Ok(Registration::Registered)
}
