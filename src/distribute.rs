use anyhow::{Context, Result};
use tracing::debug;

use crate::config::FileSpec;
use crate::deploy::context::DeployContext;
use crate::fetch::Fetcher;
use crate::output;
use crate::pve::ContainerRuntime;

/// Replace `{{NAME}}` placeholders. Unknown placeholders are left untouched
/// so files that use their own `{{ }}` syntax (Grafana, Prometheus) survive.
pub fn substitute(content: &str, vars: &[(&str, String)]) -> String {
    let mut result = content.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{{{}}}}}", key), value);
    }
    result
}

/// Files pushed into this stack: shared ones first, then the stack's own.
pub fn files_for(ctx: &DeployContext) -> Vec<&FileSpec> {
    ctx.registry
        .common_files
        .iter()
        .chain(ctx.stack.files.iter())
        .collect()
}

/// Fetch, substitute and push every config file for the stack.
///
/// The first failure stops the remaining transfers.
pub async fn push_configs<R, F>(runtime: &R, fetcher: &F, ctx: &DeployContext) -> Result<usize>
where
    R: ContainerRuntime,
    F: Fetcher,
{
    let files = files_for(ctx);
    if files.is_empty() {
        output::info("No config files for this stack");
        return Ok(0);
    }

    let vars = ctx.placeholders();

    for file in &files {
        let template = fetcher
            .fetch_text(&file.source)
            .await
            .with_context(|| format!("Failed to fetch config {}", file.source))?;

        let rendered = substitute(&template, &vars);

        runtime
            .push(ctx.id(), rendered.as_bytes(), &file.target, None)
            .await
            .with_context(|| format!("Failed to push config {}", file.target))?;

        debug!("{} -> {}", file.source, file.target);
        output::success(&format!("Pushed {}", file.target));
    }

    Ok(files.len())
}
