use crate::config::StackKind;

/// Base image family a container is created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    /// Minimal image for Docker stacks.
    Alpine,
    /// Full OS image for the native backup server.
    Debian,
}

impl OsFamily {
    pub fn for_kind(kind: StackKind) -> Self {
        match kind {
            StackKind::Docker => OsFamily::Alpine,
            StackKind::Backup => OsFamily::Debian,
        }
    }

    /// Prefix matched against `pveam available` names.
    pub fn template_prefix(&self) -> &'static str {
        match self {
            OsFamily::Alpine => "alpine-3",
            OsFamily::Debian => "debian-12-standard",
        }
    }

    pub fn ostype(&self) -> &'static str {
        match self {
            OsFamily::Alpine => "alpine",
            OsFamily::Debian => "debian",
        }
    }

    /// File present once the container's init has come up.
    pub fn init_marker(&self) -> &'static str {
        match self {
            OsFamily::Alpine => "/etc/alpine-release",
            OsFamily::Debian => "/etc/debian_version",
        }
    }

    pub fn install_docker_cmd(&self) -> &'static str {
        match self {
            OsFamily::Alpine => {
                "apk add --no-cache docker docker-cli-compose && rc-update add docker default && service docker start"
            }
            OsFamily::Debian => {
                "apt-get update -qq && apt-get install -y -qq curl && curl -fsSL https://get.docker.com | sh"
            }
        }
    }
}
