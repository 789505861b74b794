//! `proxmox-backup-manager` commands and the bits of its JSON output we read.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;

pub const MANAGER: &str = "proxmox-backup-manager";
pub const PROXY_SERVICE: &str = "proxmox-backup-proxy";
pub const PROMETHEUS_USER: &str = "prometheus@pbs";
pub const ADMIN_USER: &str = "root";

/// Debian 12 repository setup plus package install.
pub const INSTALL: &str = "echo 'deb http://download.proxmox.com/debian/pbs bookworm pbs-no-subscription' \
     > /etc/apt/sources.list.d/pbs.list \
     && wget -qO /etc/apt/trusted.gpg.d/proxmox-release-bookworm.gpg \
     https://enterprise.proxmox.com/debian/proxmox-release-bookworm.gpg \
     && apt-get update -qq \
     && DEBIAN_FRONTEND=noninteractive apt-get install -y -qq proxmox-backup-server";

/// Marker the service writes into an initialized datastore directory.
pub const GC_STATUS: &str = ".gc-status";

pub const KEEP_DAILY: u32 = 5;
pub const KEEP_WEEKLY: u32 = 4;
pub const KEEP_MONTHLY: u32 = 2;

#[derive(Debug, Deserialize)]
pub struct User {
    pub userid: String,
}

#[derive(Debug, Deserialize)]
pub struct Datastore {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(default)]
    pub store: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Prune,
    Verify,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::Prune, JobKind::Verify];

    pub fn subcommand(self) -> &'static str {
        match self {
            JobKind::Prune => "prune-job",
            JobKind::Verify => "verify-job",
        }
    }

    pub fn job_id(self, datastore: &str) -> String {
        match self {
            JobKind::Prune => format!("prune-{}", datastore),
            JobKind::Verify => format!("verify-{}", datastore),
        }
    }

    pub fn create_cmd(self, datastore: &str, schedule: &str) -> String {
        let id = self.job_id(datastore);
        match self {
            JobKind::Prune => format!(
                "{} prune-job create {} --store {} --schedule '{}' \
                 --keep-daily {} --keep-weekly {} --keep-monthly {}",
                MANAGER, id, datastore, schedule, KEEP_DAILY, KEEP_WEEKLY, KEEP_MONTHLY
            ),
            JobKind::Verify => format!(
                "{} verify-job create {} --store {} --schedule '{}' \
                 --ignore-verified true --outdated-after 30",
                MANAGER, id, datastore, schedule
            ),
        }
    }
}

pub fn list_cmd(subcommand: &str) -> String {
    format!("{} {} list --output-format json", MANAGER, subcommand)
}

pub fn is_active_cmd() -> String {
    format!("systemctl is-active --quiet {}", PROXY_SERVICE)
}

pub fn create_datastore_cmd(name: &str, path: &str) -> String {
    format!("{} datastore create {} {}", MANAGER, name, path)
}

pub fn acl_cmd(datastore: &str) -> String {
    format!(
        "{} acl update /datastore/{} Audit --auth-id {}",
        MANAGER, datastore, PROMETHEUS_USER
    )
}

/// Reads the password from stdin. It stays out of the `pct exec` command line
/// on the host and out of our logs, but inside the container it is still an
/// argument of `proxmox-backup-manager` while that runs.
pub fn create_user_cmd() -> String {
    format!(
        "read -r PW && {} user create {} --password \"$PW\"",
        MANAGER, PROMETHEUS_USER
    )
}

/// Remove everything inside `path` but keep the directory itself.
pub fn clear_dir_cmd(path: &str) -> String {
    format!("find {} -mindepth 1 -delete", path)
}

pub fn count_entries_cmd(path: &str) -> String {
    format!("ls -A {} | wc -l", path)
}

/// Parse a `--output-format json` listing. Empty output is an empty list.
pub fn parse_list<T: DeserializeOwned>(what: &str, stdout: &str) -> Result<Vec<T>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed).with_context(|| format!("Failed to parse {} listing", what))
}

pub fn has_user(users: &[User], userid: &str) -> bool {
    users.iter().any(|u| u.userid == userid)
}

pub fn has_datastore(stores: &[Datastore], name: &str) -> bool {
    stores.iter().any(|d| d.name == name)
}

/// A job counts if it has our id or already targets the store.
pub fn has_job(jobs: &[Job], kind: JobKind, datastore: &str) -> bool {
    let id = kind.job_id(datastore);
    jobs.iter()
        .any(|j| j.id == id || j.store.as_deref() == Some(datastore))
}
