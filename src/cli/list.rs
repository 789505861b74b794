use anyhow::Result;

use crate::config::{Registry, StackKind};
use crate::output;

pub fn run(registry: &Registry) -> Result<()> {
    output::header(&format!("{} stacks", registry.stacks.len()));

    println!(
        "  {:<12} {:>5}  {:<16} {:<14} {:<7} {:>5} {:>7} {:>5}",
        "STACK", "ID", "IP", "HOSTNAME", "KIND", "CORES", "MEM", "DISK"
    );
    for stack in registry.stacks.values() {
        let kind = match stack.kind {
            StackKind::Docker => "docker",
            StackKind::Backup => "backup",
        };
        println!(
            "  {:<12} {:>5}  {:<16} {:<14} {:<7} {:>5} {:>5}MB {:>3}GB",
            stack.name,
            stack.container_id,
            registry.ip_of(stack),
            stack.hostname,
            kind,
            stack.cores,
            stack.memory_mb,
            stack.disk_gb
        );
    }

    Ok(())
}
