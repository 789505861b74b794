use anyhow::{Context, Result};
use tracing::debug;

use crate::backup::{self, BackupState};
use crate::compose;
use crate::distribute;
use crate::fetch::Fetcher;
use crate::output;
use crate::provision::{self, Provisioned};
use crate::pve::ContainerRuntime;
use crate::record::DeploymentRecord;
use crate::secrets::{Prompt, SecretPipeline};

use super::context::DeployContext;

pub const DOCKER_STEPS: usize = 6;
pub const BACKUP_STEPS: usize = 3;

pub async fn provision<R: ContainerRuntime>(
    runtime: &R,
    ctx: &DeployContext,
    total: usize,
) -> Result<Provisioned> {
    output::step(1, total, &format!("Ensuring container {}", ctx.id()));

    provision::ensure_container(runtime, ctx)
        .await
        .with_context(|| format!("Failed to provision container {}", ctx.id()))
}

/// Returns the plaintext env and the ciphertext's SHA-256.
pub async fn decrypt_secrets<F, P>(
    secrets: &mut SecretPipeline,
    fetcher: &F,
    prompt: &mut P,
    ctx: &DeployContext,
    previous: Option<&DeploymentRecord>,
) -> Result<(Vec<u8>, String)>
where
    F: Fetcher,
    P: Prompt,
{
    output::step(2, DOCKER_STEPS, "Decrypting secrets");

    let env = secrets.decrypt_stack(fetcher, prompt, &ctx.stack.name).await?;
    let sha = env.bundle_sha256().to_string();

    if previous.and_then(|r| r.secrets_sha256.as_deref()) == Some(sha.as_str()) {
        output::success("Secrets decrypted (unchanged since last deploy)");
    } else {
        output::success("Secrets decrypted");
    }

    Ok((env.read()?, sha))
}

pub async fn push_configs<R, F>(runtime: &R, fetcher: &F, ctx: &DeployContext) -> Result<()>
where
    R: ContainerRuntime,
    F: Fetcher,
{
    output::step(3, DOCKER_STEPS, "Pushing configuration files");

    let count = distribute::push_configs(runtime, fetcher, ctx).await?;
    debug!("{} config files pushed", count);
    Ok(())
}

/// Push the compose definition and `.env`. Returns the definition's SHA-256.
pub async fn push_compose<R, F>(
    runtime: &R,
    fetcher: &F,
    ctx: &DeployContext,
    env: &[u8],
    previous: Option<&DeploymentRecord>,
) -> Result<String>
where
    R: ContainerRuntime,
    F: Fetcher,
{
    output::step(4, DOCKER_STEPS, "Pushing compose definition");

    let sha = compose::push_definition(runtime, fetcher, ctx).await?;
    match previous.and_then(|r| r.compose_sha256.as_deref()) {
        Some(prev) if prev == sha => output::success("docker-compose.yml pushed (unchanged)"),
        Some(_) => output::success("docker-compose.yml pushed (changed since last deploy)"),
        None => output::success("docker-compose.yml pushed"),
    }

    compose::push_env(runtime, ctx, env).await?;
    output::success(".env pushed");
    Ok(sha)
}

pub async fn start_stack<R: ContainerRuntime>(runtime: &R, ctx: &DeployContext) -> Result<()> {
    output::step(5, DOCKER_STEPS, "Starting stack");

    compose::up(runtime, ctx).await?;
    output::success("Containers started");
    Ok(())
}

pub async fn configure_backup<R, P>(
    runtime: &R,
    prompt: &mut P,
    ctx: &DeployContext,
) -> Result<BackupState>
where
    R: ContainerRuntime,
    P: Prompt,
{
    output::step(2, BACKUP_STEPS, "Configuring backup server");

    let trail = backup::run(runtime, prompt, ctx)
        .await
        .context("Backup server configuration failed")?;

    // the loop only exits once jobs are configured
    Ok(trail.last().copied().unwrap_or(BackupState::ServiceNotReady))
}

pub fn write_record(
    ctx: &DeployContext,
    record: &DeploymentRecord,
    step: usize,
    total: usize,
) -> Result<()> {
    output::step(step, total, "Recording deployment");

    record
        .write(&ctx.state_dir)
        .context("Failed to write deployment record")?;

    output::success(&format!(
        "Recorded in {}",
        DeploymentRecord::path(&ctx.state_dir, &ctx.stack.name).display()
    ));
    Ok(())
}
