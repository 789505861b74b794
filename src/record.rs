use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Last successful deployment of a stack, stored as
/// `<state_dir>/deployments/<stack>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub stack: String,
    pub container_id: u32,
    pub hostname: String,
    pub ip: String,
    pub deployed_at: String,
    /// Whether this run created the container.
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub compose_sha256: Option<String>,
    #[serde(default)]
    pub secrets_sha256: Option<String>,
}

impl DeploymentRecord {
    pub fn new(stack: &str, container_id: u32, hostname: &str, ip: &str, created: bool) -> Self {
        Self {
            stack: stack.to_string(),
            container_id,
            hostname: hostname.to_string(),
            ip: ip.to_string(),
            deployed_at: chrono::Local::now().to_rfc3339(),
            created,
            compose_sha256: None,
            secrets_sha256: None,
        }
    }

    pub fn path(state_dir: &Path, stack: &str) -> PathBuf {
        state_dir.join("deployments").join(format!("{}.json", stack))
    }

    pub fn read(state_dir: &Path, stack: &str) -> Result<Option<Self>> {
        let path = Self::path(state_dir, stack);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let record: Self = serde_json::from_str(content.trim())
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(record))
    }

    pub fn write(&self, state_dir: &Path) -> Result<()> {
        let path = Self::path(state_dir, &self.stack);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn deployed_at_display(&self) -> String {
        chrono::DateTime::parse_from_rfc3339(&self.deployed_at)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|_| self.deployed_at.clone())
    }
}
