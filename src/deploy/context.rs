use std::path::PathBuf;

use anyhow::Result;

use crate::config::{Registry, StackConfig};
use crate::pve::{CreateSpec, OsFamily};
use crate::retry::RetryPolicy;

/// Bounded polls used during one deployment.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub container_ready: RetryPolicy,
    pub service_ready: RetryPolicy,
    pub datastore_create: RetryPolicy,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            container_ready: RetryPolicy::container_ready(),
            service_ready: RetryPolicy::service_ready(),
            datastore_create: RetryPolicy::datastore_create(),
        }
    }
}

pub struct DeployContext {
    pub registry: Registry,
    pub stack: StackConfig,
    pub state_dir: PathBuf,
    /// Re-prompt for the backup server admin password even if one is recorded.
    pub rotate_admin: bool,
    pub timings: Timings,
}

impl DeployContext {
    pub fn new(registry: Registry, stack: StackConfig, state_dir: PathBuf) -> Self {
        Self {
            registry,
            stack,
            state_dir,
            rotate_admin: false,
            timings: Timings::default(),
        }
    }

    /// Resolve `name` before anything touches the host.
    pub fn for_stack(registry: Registry, name: &str, state_dir: PathBuf) -> Result<Self> {
        let stack = registry.stack(name)?.clone();
        Ok(Self::new(registry, stack, state_dir))
    }

    pub fn id(&self) -> u32 {
        self.stack.container_id
    }

    pub fn ip(&self) -> String {
        self.registry.ip_of(&self.stack)
    }

    pub fn os_family(&self) -> OsFamily {
        OsFamily::for_kind(self.stack.kind)
    }

    pub fn compose_path(&self) -> String {
        format!("{}/docker-compose.yml", self.stack.app_dir())
    }

    pub fn env_path(&self) -> String {
        format!("{}/.env", self.stack.app_dir())
    }

    pub fn create_spec(&self, template: &str) -> CreateSpec {
        let storage = &self.registry.storage;
        let network = &self.registry.network;
        CreateSpec {
            id: self.stack.container_id,
            template: format!("{}:vztmpl/{}", storage.templates, template),
            ostype: self.os_family().ostype().to_string(),
            hostname: self.stack.hostname.clone(),
            cores: self.stack.cores,
            memory_mb: self.stack.memory_mb,
            swap_mb: self.stack.memory_mb / 4,
            rootfs_storage: storage.rootfs.clone(),
            disk_gb: self.stack.disk_gb,
            bridge: network.bridge.clone(),
            ip_cidr: format!("{}/{}", self.ip(), network.cidr),
            gateway: network.gateway.clone(),
        }
    }

    /// Placeholder → value pairs substituted into pushed config files.
    pub fn placeholders(&self) -> Vec<(&'static str, String)> {
        vec![
            ("HOSTNAME", self.stack.hostname.clone()),
            ("STACK", self.stack.name.clone()),
            ("IP", self.ip()),
            ("CONTAINER_ID", self.stack.container_id.to_string()),
        ]
    }
}
