use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::DeployError;

mod validate;

#[derive(Debug, Deserialize, Serialize)]
pub struct Registry {
    pub network: NetworkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
    pub proxmox: Option<ProxmoxConfig>,
    pub backup: Option<BackupConfig>,
    #[serde(default)]
    pub common_files: Vec<FileSpec>,
    #[serde(default)]
    pub stacks: BTreeMap<String, StackConfig>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct NetworkConfig {
    pub prefix: String,
    pub gateway: String,
    #[serde(default = "default_bridge")]
    pub bridge: String,
    #[serde(default = "default_cidr")]
    pub cidr: u8,
}

fn default_bridge() -> String {
    "vmbr0".to_string()
}

fn default_cidr() -> u8 {
    24
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_rootfs")]
    pub rootfs: String,
    #[serde(default = "default_templates")]
    pub templates: String,
    pub shared_host_path: Option<String>,
    #[serde(default = "default_shared_mount_path")]
    pub shared_mount_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            rootfs: default_rootfs(),
            templates: default_templates(),
            shared_host_path: None,
            shared_mount_path: default_shared_mount_path(),
        }
    }
}

fn default_rootfs() -> String {
    "local-lvm".to_string()
}
fn default_templates() -> String {
    "local".to_string()
}
fn default_shared_mount_path() -> String {
    "/mnt/shared".to_string()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RemoteConfig {
    pub base_url: String,
}

/// Where `pct` runs. Without this section commands run on the local host.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProxmoxConfig {
    pub host: String,
    #[serde(default = "default_proxmox_user")]
    pub user: String,
    pub port: Option<u16>,
}

fn default_proxmox_user() -> String {
    "root".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BackupConfig {
    #[serde(default = "default_datastore")]
    pub datastore: String,
    #[serde(default = "default_datastore_path")]
    pub datastore_path: String,
    #[serde(default = "default_prune_schedule")]
    pub prune_schedule: String,
    #[serde(default = "default_verify_schedule")]
    pub verify_schedule: String,
    pub monitoring_stack: Option<String>,
}

fn default_datastore() -> String {
    "backups".to_string()
}
fn default_datastore_path() -> String {
    "/mnt/datastore/backups".to_string()
}
fn default_prune_schedule() -> String {
    "daily".to_string()
}
fn default_verify_schedule() -> String {
    "sat 03:00".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StackKind {
    #[default]
    Docker,
    Backup,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FileSpec {
    /// Path below `remote.base_url`
    pub source: String,
    /// Absolute path inside the container
    pub target: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StackConfig {
    #[serde(skip)]
    pub name: String,
    pub container_id: u32,
    pub hostname: String,
    #[serde(default = "default_cores")]
    pub cores: u32,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    #[serde(default = "default_disk_gb")]
    pub disk_gb: u32,
    pub ip_octet: u8,
    #[serde(default)]
    pub kind: StackKind,
    #[serde(default = "default_shared_storage")]
    pub shared_storage: bool,
    #[serde(default)]
    pub files: Vec<FileSpec>,
}

fn default_cores() -> u32 {
    2
}
fn default_memory_mb() -> u32 {
    2048
}
fn default_disk_gb() -> u32 {
    8
}
fn default_shared_storage() -> bool {
    true
}

impl Registry {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read registry: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to load registry: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut registry: Self = toml::from_str(content)
            .map_err(|e| DeployError::config(format!("invalid registry: {}", e)))?;

        for (name, stack) in registry.stacks.iter_mut() {
            stack.name = name.clone();
        }

        validate::validate(&registry)?;

        Ok(registry)
    }

    pub fn stack(&self, name: &str) -> Result<&StackConfig> {
        self.stacks
            .get(name)
            .ok_or_else(|| {
                DeployError::config(format!("configuration missing for stack '{}'", name))
            })
            .map_err(Into::into)
    }

    pub fn stack_names(&self) -> Vec<&str> {
        self.stacks.keys().map(String::as_str).collect()
    }

    /// `[backup]` section, required once a backup-kind stack is deployed.
    pub fn backup(&self) -> Result<&BackupConfig> {
        self.backup
            .as_ref()
            .ok_or_else(|| DeployError::config("[backup] section missing").into())
    }

    pub fn ip_of(&self, stack: &StackConfig) -> String {
        format!("{}.{}", self.network.prefix, stack.ip_octet)
    }
}

impl StackConfig {
    /// Directory holding the compose project inside the container.
    pub fn app_dir(&self) -> String {
        format!("/opt/{}", self.name)
    }
}

/// Local state: PBS credentials and deployment records.
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("PVESTACK_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let config_dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(config_dir.join("pvestack"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{root_cause, DeployError};

    pub(crate) const SAMPLE: &str = r#"
[network]
prefix = "192.168.1"
gateway = "192.168.1.1"

[storage]
shared_host_path = "/tank/shared"

[remote]
base_url = "https://example.test/homelab/"

[backup]
monitoring_stack = "monitoring"

[[common_files]]
source = "config/promtail/config.yml"
target = "/opt/promtail/config.yml"

[stacks.proxy]
container_id = 100
hostname = "proxy"
cores = 1
memory_mb = 512
disk_gb = 4
ip_octet = 100
shared_storage = false

[stacks.media]
container_id = 101
hostname = "media"
ip_octet = 101

[stacks.monitoring]
container_id = 102
hostname = "monitoring"
ip_octet = 102

[[stacks.monitoring.files]]
source = "config/prometheus/prometheus.yml"
target = "/opt/monitoring/prometheus/prometheus.yml"

[stacks.backup]
container_id = 110
hostname = "pbs"
ip_octet = 110
kind = "backup"
"#;

    pub(crate) fn sample() -> Registry {
        Registry::parse(SAMPLE).expect("sample registry parses")
    }

    #[test]
    fn loads_stacks_with_defaults() {
        let reg = sample();
        let media = reg.stack("media").unwrap();
        assert_eq!(media.name, "media");
        assert_eq!(media.cores, 2);
        assert_eq!(media.memory_mb, 2048);
        assert!(media.shared_storage);
        assert_eq!(media.kind, StackKind::Docker);
        assert_eq!(reg.stack("backup").unwrap().kind, StackKind::Backup);
        assert!(!reg.stack("proxy").unwrap().shared_storage);
    }

    #[test]
    fn derives_ip_from_prefix_and_octet() {
        let reg = sample();
        assert_eq!(reg.ip_of(reg.stack("proxy").unwrap()), "192.168.1.100");
    }

    #[test]
    fn unknown_stack_is_config_error() {
        let reg = sample();
        let err = reg.stack("nope").unwrap_err();
        assert!(matches!(root_cause(&err), Some(DeployError::Config(_))));
        assert!(err.to_string().contains("configuration missing"));
    }

    #[test]
    fn missing_required_field_is_config_error() {
        let broken = SAMPLE.replace("hostname = \"media\"\n", "");
        let err = Registry::parse(&broken).unwrap_err();
        assert!(matches!(root_cause(&err), Some(DeployError::Config(_))));
    }
}
