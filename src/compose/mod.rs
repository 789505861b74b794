use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::deploy::context::DeployContext;
use crate::fetch::Fetcher;
use crate::output;
use crate::pve::ContainerRuntime;

pub fn definition_path(stack: &str) -> String {
    format!("stacks/{}/docker-compose.yml", stack)
}

/// Fetch the stack's compose file and push it verbatim. Returns its SHA-256.
pub async fn push_definition<R, F>(runtime: &R, fetcher: &F, ctx: &DeployContext) -> Result<String>
where
    R: ContainerRuntime,
    F: Fetcher,
{
    let definition = fetcher
        .fetch(&definition_path(&ctx.stack.name))
        .await
        .with_context(|| format!("No compose definition for stack '{}'", ctx.stack.name))?;

    runtime
        .push(ctx.id(), &definition, &ctx.compose_path(), None)
        .await
        .context("Failed to push docker-compose.yml")?;

    Ok(hex::encode(Sha256::digest(&definition)))
}

/// Place the decrypted env next to the compose file.
pub async fn push_env<R: ContainerRuntime>(
    runtime: &R,
    ctx: &DeployContext,
    env: &[u8],
) -> Result<()> {
    runtime
        .push(ctx.id(), env, &ctx.env_path(), Some(0o600))
        .await
        .context("Failed to push .env")
}

/// Prune unused runtime objects, then `docker compose up -d`.
pub async fn up<R: ContainerRuntime>(runtime: &R, ctx: &DeployContext) -> Result<()> {
    let id = ctx.id();

    runtime
        .exec(id, "docker system prune -f")
        .await
        .context("Failed to prune Docker objects")?;

    let spinner = output::spinner("Starting containers...");
    let started = runtime
        .exec(
            id,
            &format!("cd {} && docker compose up -d --remove-orphans", ctx.stack.app_dir()),
        )
        .await;
    spinner.finish_and_clear();

    started.context("Failed to start containers")?;
    Ok(())
}
