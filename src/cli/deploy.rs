use std::future::Future;

use anyhow::{Context, Result};
use dialoguer::Select;
use thiserror::Error;

use crate::config::{self, Registry};
use crate::deploy;
use crate::deploy::context::DeployContext;
use crate::error::DeployError;
use crate::fetch::HttpFetcher;
use crate::output;
use crate::pve::pct::Pct;
use crate::pve::runner::HostRunner;
use crate::secrets::{SecretPipeline, TerminalPrompt};

/// Operator pressed Ctrl-C during a deployment.
#[derive(Debug, Error)]
#[error("Interrupted")]
pub struct Interrupted;

pub async fn run(registry: Registry, stack: Option<&str>, rotate_admin: bool) -> Result<()> {
    let name = match stack {
        Some(name) => name.to_string(),
        None => pick_stack(&registry)?,
    };

    // unknown stacks fail here, before any connection is made
    let mut ctx = DeployContext::for_stack(registry, &name, config::state_dir()?)?;
    ctx.rotate_admin = rotate_admin;

    let fetcher = HttpFetcher::new(&ctx.registry.remote.base_url)?;
    let runner = HostRunner::connect(ctx.registry.proxmox.as_ref())
        .await
        .context("Failed to reach the Proxmox host")?;
    let pct = Pct::new(runner);
    output::info(&format!("Proxmox host: {}", pct.host()));

    let mut prompt = TerminalPrompt::new();
    let mut secrets = SecretPipeline::new();

    let result = until_interrupted(
        deploy::run(&ctx, &pct, &fetcher, &mut prompt, &mut secrets),
        tokio::signal::ctrl_c(),
    )
    .await;

    let cleaned = secrets.cleanup();
    let closed = pct.close().await;
    settle(result.map(|_| ()), cleaned, closed)
}

/// The deploy outcome outranks teardown failures.
fn settle(result: Result<()>, cleaned: Result<()>, closed: Result<()>) -> Result<()> {
    result?;
    cleaned?;
    closed
}

/// Drive `work` until it finishes or `interrupt` resolves. Dropping `work`
/// drops any plaintext it still holds.
async fn until_interrupted<T, W, I>(work: W, interrupt: I) -> Result<T>
where
    W: Future<Output = Result<T>>,
    I: Future,
{
    tokio::select! {
        res = work => res,
        _ = interrupt => Err(Interrupted.into()),
    }
}

fn pick_stack(registry: &Registry) -> Result<String> {
    let names = registry.stack_names();
    if names.is_empty() {
        return Err(DeployError::config("no stacks defined in the registry").into());
    }
    if !console::user_attended() {
        return Err(DeployError::config("no stack given and no terminal to pick one").into());
    }

    let items: Vec<String> = names
        .iter()
        .filter_map(|name| registry.stacks.get(*name))
        .map(|s| format!("{:<12} {} ({})", s.name, s.container_id, s.hostname))
        .collect();

    let idx = Select::new()
        .with_prompt("Stack to deploy")
        .items(&items)
        .default(0)
        .interact()?;

    Ok(names[idx].to_string())
}
