use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::Rng;
use sha2::{Digest, Sha256};

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Backup server credentials kept on the operator's machine:
/// `<state_dir>/pbs/{admin.password,admin.sha256,prometheus.password}`.
pub struct Credentials {
    dir: PathBuf,
}

impl Credentials {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("pbs"),
        }
    }

    fn admin_hash_path(&self) -> PathBuf {
        self.dir.join("admin.sha256")
    }

    fn admin_password_path(&self) -> PathBuf {
        self.dir.join("admin.password")
    }

    fn prometheus_password_path(&self) -> PathBuf {
        self.dir.join("prometheus.password")
    }

    /// Marker that the admin password was set on an earlier run.
    pub fn admin_password_recorded(&self) -> bool {
        self.admin_hash_path().exists()
    }

    pub fn save_admin_password(&self, password: &str) -> Result<()> {
        write_private(&self.admin_password_path(), password)?;
        write_private(&self.admin_hash_path(), &sha256_hex(password))?;
        Ok(())
    }

    /// True when the stored password still matches the stored hash.
    pub fn admin_password_consistent(&self) -> Result<bool> {
        let password = match fs::read_to_string(self.admin_password_path()) {
            Ok(p) => p,
            Err(_) => return Ok(false),
        };
        let hash = fs::read_to_string(self.admin_hash_path())
            .context("Failed to read admin password hash")?;
        Ok(sha256_hex(&password) == hash.trim())
    }

    pub fn prometheus_password(&self) -> Option<String> {
        fs::read_to_string(self.prometheus_password_path())
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn save_prometheus_password(&self, password: &str) -> Result<()> {
        write_private(&self.prometheus_password_path(), password)
    }
}

pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

pub fn random_password(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

fn write_private(path: &Path, content: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_password_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let creds = Credentials::new(dir.path());
        assert!(!creds.admin_password_recorded());

        creds.save_admin_password("a-long-password").unwrap();

        assert!(creds.admin_password_recorded());
        assert!(creds.admin_password_consistent().unwrap());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join("pbs/admin.password"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn tampered_password_is_inconsistent() {
        let dir = tempfile::tempdir().unwrap();
        let creds = Credentials::new(dir.path());
        creds.save_admin_password("a-long-password").unwrap();
        fs::write(dir.path().join("pbs/admin.password"), "other").unwrap();
        assert!(!creds.admin_password_consistent().unwrap());
    }

    #[test]
    fn random_passwords_are_alphanumeric() {
        let pw = random_password(32);
        assert_eq!(pw.len(), 32);
        assert!(pw.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(pw, random_password(32));
    }
}
