use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::cipher;
use super::prompt::Prompt;
use crate::error::DeployError;
use crate::fetch::Fetcher;
use crate::output;

/// Decrypt attempts per bundle; re-prompts after the first failure.
pub const MAX_ATTEMPTS: u32 = 3;

pub fn bundle_path(stack: &str) -> String {
    format!("stacks/{}/.env.enc", stack)
}

/// Plaintext env file that only lives for the current run.
///
/// The file is created with 0600 and removed when this value drops, so every
/// exit path (error, panic, Ctrl-C dropping the deploy future) cleans it up.
pub struct DecryptedEnv {
    file: NamedTempFile,
    sha256: String,
}

impl DecryptedEnv {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(self.path())
            .with_context(|| format!("Failed to read {}", self.path().display()))
    }

    /// SHA-256 of the ciphertext this came from.
    pub fn bundle_sha256(&self) -> &str {
        &self.sha256
    }
}

/// Secret state of one invocation: the accepted passphrase and the stacks
/// decrypted so far.
pub struct SecretPipeline {
    passphrase: Option<String>,
    decrypted: HashMap<String, DecryptedEnv>,
    workdir: Option<PathBuf>,
}

impl SecretPipeline {
    pub fn new() -> Self {
        Self {
            passphrase: None,
            decrypted: HashMap::new(),
            workdir: None,
        }
    }

    /// Place plaintext files in `dir` instead of the system temp dir.
    #[cfg(test)]
    pub fn with_workdir(dir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: Some(dir.into()),
            ..Self::new()
        }
    }

    /// Fetch and decrypt `stack`'s bundle, or return the file decrypted earlier in this run.
    pub async fn decrypt_stack<F, P>(
        &mut self,
        fetcher: &F,
        prompt: &mut P,
        stack: &str,
    ) -> Result<&DecryptedEnv>
    where
        F: Fetcher,
        P: Prompt,
    {
        if self.decrypted.contains_key(stack) {
            debug!("Secrets for '{}' already decrypted this run", stack);
            return Ok(&self.decrypted[stack]);
        }

        let ciphertext = fetcher
            .fetch(&bundle_path(stack))
            .await
            .with_context(|| format!("No secret bundle for stack '{}'", stack))?;

        let plaintext = self.decrypt_with_retry(&ciphertext, prompt, stack).await?;

        let env = DecryptedEnv {
            file: self.write_plaintext(&plaintext)?,
            sha256: hex::encode(Sha256::digest(&ciphertext)),
        };
        info!("Decrypted secrets for '{}' to {}", stack, env.path().display());

        self.decrypted.insert(stack.to_string(), env);
        Ok(&self.decrypted[stack])
    }

    async fn decrypt_with_retry<P: Prompt>(
        &mut self,
        ciphertext: &[u8],
        prompt: &mut P,
        stack: &str,
    ) -> Result<Vec<u8>> {
        for attempt in 1..=MAX_ATTEMPTS {
            let passphrase = match (attempt, self.passphrase.take()) {
                (1, Some(cached)) => cached,
                _ => prompt.passphrase(stack, attempt).await?,
            };

            match cipher::decrypt(ciphertext, &passphrase) {
                Ok(plaintext) => {
                    self.passphrase = Some(passphrase);
                    return Ok(plaintext);
                }
                Err(e) => {
                    debug!("Decrypt attempt {}/{} for '{}': {}", attempt, MAX_ATTEMPTS, stack, e);
                    if attempt < MAX_ATTEMPTS {
                        output::warning("Decryption failed, try again");
                    }
                }
            }
        }

        Err(DeployError::Decrypt(format!(
            "could not decrypt secrets for '{}' after {} attempts",
            stack, MAX_ATTEMPTS
        ))
        .into())
    }

    fn write_plaintext(&self, plaintext: &[u8]) -> Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pvestack-").suffix(".env");

        let mut file = match &self.workdir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .context("Failed to create plaintext env file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(plaintext)
            .context("Failed to write plaintext env file")?;
        file.flush()?;
        Ok(file)
    }

    /// Remove every plaintext file created in this run.
    pub fn cleanup(self) -> Result<()> {
        for (stack, env) in self.decrypted {
            env.file
                .close()
                .with_context(|| format!("Failed to remove plaintext secrets for '{}'", stack))?;
        }
        Ok(())
    }
}

impl Default for SecretPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::root_cause;
    use crate::fetch::tests::MapFetcher;
    use crate::secrets::cipher::tests::{OPENSSL_BUNDLE, OPENSSL_PLAINTEXT};
    use crate::secrets::prompt::tests::ScriptedPrompt;
    use crate::secrets::prompt::TerminalPrompt;

    fn bundle() -> Vec<u8> {
        hex::decode(OPENSSL_BUNDLE).unwrap()
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn decrypts_once_and_reuses_result() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MapFetcher::default().with("stacks/media/.env.enc", bundle());
        let mut prompt = ScriptedPrompt::passphrases(&["correct-horse"]);
        let mut secrets = SecretPipeline::with_workdir(dir.path());

        let first = secrets
            .decrypt_stack(&fetcher, &mut prompt, "media")
            .await
            .unwrap()
            .path()
            .to_path_buf();
        let second = secrets
            .decrypt_stack(&fetcher, &mut prompt, "media")
            .await
            .unwrap();

        assert_eq!(first, second.path());
        assert_eq!(second.read().unwrap(), OPENSSL_PLAINTEXT.as_bytes());
        assert_eq!(prompt.asked, 1);
        assert_eq!(fetcher.requests.borrow().len(), 1);
    }

    #[tokio::test]
    async fn passphrase_carries_over_to_next_stack() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MapFetcher::default()
            .with("stacks/media/.env.enc", bundle())
            .with("stacks/proxy/.env.enc", cipher::encrypt(b"X=1\n", "correct-horse"));
        let mut prompt = ScriptedPrompt::passphrases(&["correct-horse"]);
        let mut secrets = SecretPipeline::with_workdir(dir.path());

        secrets.decrypt_stack(&fetcher, &mut prompt, "media").await.unwrap();
        let proxy = secrets.decrypt_stack(&fetcher, &mut prompt, "proxy").await.unwrap();

        assert_eq!(proxy.read().unwrap(), b"X=1\n");
        assert_eq!(prompt.asked, 1);
    }

    #[tokio::test]
    async fn wrong_then_right_passphrase_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MapFetcher::default().with("stacks/media/.env.enc", bundle());
        let mut prompt = ScriptedPrompt::passphrases(&["wrong", "correct-horse"]);
        let mut secrets = SecretPipeline::with_workdir(dir.path());

        secrets.decrypt_stack(&fetcher, &mut prompt, "media").await.unwrap();
        assert_eq!(prompt.asked, 2);
    }

    #[tokio::test]
    async fn three_wrong_passphrases_exhaust_the_budget() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MapFetcher::default().with("stacks/media/.env.enc", bundle());
        let mut prompt =
            ScriptedPrompt::passphrases(&["wrong", "hunter2", "correct-horsE", "correct-horse"]);
        let mut secrets = SecretPipeline::with_workdir(dir.path());

        let err = secrets
            .decrypt_stack(&fetcher, &mut prompt, "media")
            .await
            .err()
            .unwrap();

        assert!(matches!(root_cause(&err), Some(DeployError::Decrypt(_))));
        assert_eq!(prompt.asked, 3);
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn rejected_env_passphrase_without_terminal_is_a_decrypt_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MapFetcher::default().with("stacks/media/.env.enc", bundle());
        let mut prompt = TerminalPrompt::with(Some("wrong-passphrase".to_string()), false);
        let mut secrets = SecretPipeline::with_workdir(dir.path());

        let err = secrets
            .decrypt_stack(&fetcher, &mut prompt, "media")
            .await
            .err()
            .unwrap();

        assert!(matches!(root_cause(&err), Some(DeployError::Decrypt(_))));
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn missing_bundle_fails_without_prompting_or_writing() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MapFetcher::default();
        let mut prompt = ScriptedPrompt::passphrases(&["correct-horse"]);
        let mut secrets = SecretPipeline::with_workdir(dir.path());

        let err = secrets
            .decrypt_stack(&fetcher, &mut prompt, "media")
            .await
            .err()
            .unwrap();

        assert!(matches!(root_cause(&err), Some(DeployError::Fetch { .. })));
        assert_eq!(prompt.asked, 0);
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn plaintext_is_removed_on_cleanup_and_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MapFetcher::default()
            .with("stacks/media/.env.enc", bundle())
            .with("stacks/proxy/.env.enc", bundle());
        let mut prompt = ScriptedPrompt::passphrases(&["correct-horse"]);

        let mut secrets = SecretPipeline::with_workdir(dir.path());
        secrets.decrypt_stack(&fetcher, &mut prompt, "media").await.unwrap();
        assert_eq!(entries(dir.path()), 1);
        secrets.cleanup().unwrap();
        assert_eq!(entries(dir.path()), 0);

        let mut secrets = SecretPipeline::with_workdir(dir.path());
        let mut prompt = ScriptedPrompt::passphrases(&["correct-horse"]);
        secrets.decrypt_stack(&fetcher, &mut prompt, "proxy").await.unwrap();
        drop(secrets);
        assert_eq!(entries(dir.path()), 0);
    }
}
