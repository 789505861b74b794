use anyhow::Result;
use std::collections::HashSet;

use super::{Registry, StackKind};
use crate::error::DeployError;

fn fail(msg: String) -> Result<()> {
    Err(DeployError::Config(msg).into())
}

pub fn validate(registry: &Registry) -> Result<()> {
    if registry.remote.base_url.is_empty() {
        return fail("remote.base_url cannot be empty".to_string());
    }

    if registry.network.prefix.is_empty() {
        return fail("network.prefix cannot be empty".to_string());
    }

    if registry.network.cidr == 0 || registry.network.cidr > 32 {
        return fail(format!(
            "network.cidr has invalid value {}",
            registry.network.cidr
        ));
    }

    let mut ids = HashSet::new();
    let mut hostnames = HashSet::new();

    for (name, stack) in &registry.stacks {
        if stack.hostname.is_empty() {
            return fail(format!("Stack '{}' has an empty hostname", name));
        }

        if stack.container_id < 100 {
            return fail(format!(
                "Stack '{}' has container_id {} (Proxmox ids start at 100)",
                name, stack.container_id
            ));
        }

        if !(2..=254).contains(&stack.ip_octet) {
            return fail(format!(
                "Stack '{}' has ip_octet {} outside 2..=254",
                name, stack.ip_octet
            ));
        }

        if stack.cores == 0 || stack.memory_mb == 0 || stack.disk_gb == 0 {
            return fail(format!("Stack '{}' has zero-sized resources", name));
        }

        if !ids.insert(stack.container_id) {
            return fail(format!(
                "Stack '{}' reuses container_id {}",
                name, stack.container_id
            ));
        }

        if !hostnames.insert(stack.hostname.as_str()) {
            return fail(format!(
                "Stack '{}' reuses hostname '{}'",
                name, stack.hostname
            ));
        }

        if stack.kind == StackKind::Backup && registry.backup.is_none() {
            return fail(format!(
                "Stack '{}' is a backup stack but no [backup] section is configured",
                name
            ));
        }

        for file in &stack.files {
            if !file.target.starts_with('/') {
                return fail(format!(
                    "Stack '{}' file target '{}' must be an absolute path",
                    name, file.target
                ));
            }
        }
    }

    for file in &registry.common_files {
        if !file.target.starts_with('/') {
            return fail(format!(
                "common_files target '{}' must be an absolute path",
                file.target
            ));
        }
    }

    Ok(())
}
