use anyhow::Result;

use crate::config::{self, Registry, StackConfig};
use crate::output;
use crate::pve::pct::Pct;
use crate::pve::runner::HostRunner;
use crate::pve::{ContainerRuntime, ContainerState};
use crate::record::DeploymentRecord;

pub async fn run(registry: Registry, stack: Option<&str>) -> Result<()> {
    let stacks: Vec<&StackConfig> = match stack {
        Some(name) => vec![registry.stack(name)?],
        None => registry.stacks.values().collect(),
    };

    let state_dir = config::state_dir()?;
    let pct = Pct::new(HostRunner::connect(registry.proxmox.as_ref()).await?);

    for stack in stacks {
        let state = pct.state(stack.container_id).await?;
        let record = DeploymentRecord::read(&state_dir, &stack.name)?;
        print_stack(&registry, stack, state, record.as_ref());
    }

    pct.close().await?;
    Ok(())
}

fn print_stack(
    registry: &Registry,
    stack: &StackConfig,
    state: ContainerState,
    record: Option<&DeploymentRecord>,
) {
    output::header(&format!("{} ({})", stack.name, stack.container_id));

    let state = match state {
        ContainerState::Absent => "absent",
        ContainerState::Created => "stopped",
        ContainerState::Running => "running",
    };
    output::field("container", state);
    output::field("address", &registry.ip_of(stack));

    let Some(record) = record else {
        output::field("deployed", "never");
        return;
    };

    output::field("deployed", &record.deployed_at_display());
    if let Some(sha) = &record.compose_sha256 {
        output::field("compose", &sha[..12.min(sha.len())]);
    }
    if let Some(sha) = &record.secrets_sha256 {
        output::field("secrets", &sha[..12.min(sha.len())]);
    }
}
