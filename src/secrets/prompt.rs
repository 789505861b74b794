use anyhow::{Context, Result};
use dialoguer::Password;

use crate::error::DeployError;

/// Interactive input needed during a deployment.
pub trait Prompt {
    /// Passphrase for a stack's secret bundle. `attempt` starts at 1.
    async fn passphrase(&mut self, stack: &str, attempt: u32) -> Result<String>;

    /// New password entered twice, at least `min_len` characters.
    async fn new_password(&mut self, what: &str, min_len: usize) -> Result<String>;
}

pub const PASSPHRASE_ENV: &str = "PVESTACK_PASSPHRASE";

/// Run a blocking terminal read on the blocking pool so the runtime thread
/// keeps polling signals while the operator types.
pub async fn off_runtime<T, F>(read: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(read)
        .await
        .context("Prompt task failed")?
}

/// Terminal prompts; `PVESTACK_PASSPHRASE` answers the first passphrase request.
pub struct TerminalPrompt {
    env_passphrase: Option<String>,
    env_used: bool,
    attended: bool,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self::with(std::env::var(PASSPHRASE_ENV).ok(), console::user_attended())
    }

    pub(crate) fn with(env_passphrase: Option<String>, attended: bool) -> Self {
        Self {
            env_passphrase,
            env_used: false,
            attended,
        }
    }

    fn ensure_interactive(&self, what: &str) -> Result<()> {
        if !self.attended {
            return Err(DeployError::config(format!(
                "{} required but no terminal is attached (set {})",
                what, PASSPHRASE_ENV
            ))
            .into());
        }
        Ok(())
    }
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt for TerminalPrompt {
    async fn passphrase(&mut self, stack: &str, attempt: u32) -> Result<String> {
        if let Some(value) = self.env_passphrase.take() {
            self.env_used = true;
            return Ok(value);
        }

        if self.env_used && !self.attended {
            return Err(DeployError::Decrypt(format!("{} was rejected", PASSPHRASE_ENV)).into());
        }
        self.ensure_interactive("passphrase")?;

        let prompt = if attempt == 1 {
            format!("Passphrase for '{}' secrets", stack)
        } else {
            format!("Passphrase for '{}' secrets (attempt {})", stack, attempt)
        };

        off_runtime(move || {
            Password::new()
                .with_prompt(prompt)
                .interact()
                .context("Failed to read passphrase")
        })
        .await
    }

    async fn new_password(&mut self, what: &str, min_len: usize) -> Result<String> {
        self.ensure_interactive(what)?;

        let what = what.to_string();
        off_runtime(move || {
            Password::new()
                .with_prompt(format!("New {} (min {} characters)", what, min_len))
                .with_confirmation(format!("Confirm {}", what), "Passwords do not match")
                .validate_with(|input: &String| -> Result<(), String> {
                    if input.chars().count() >= min_len {
                        Ok(())
                    } else {
                        Err(format!("Must be at least {} characters", min_len))
                    }
                })
                .interact()
                .with_context(|| format!("Failed to read {}", what))
        })
        .await
    }
}
