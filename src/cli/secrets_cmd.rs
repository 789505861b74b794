use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::Registry;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::output;
use crate::secrets::{cipher, mask_value, parse_dotenv, Prompt, SecretPipeline, TerminalPrompt};

const PASSPHRASE_MIN_LEN: usize = 8;

pub async fn encrypt(file: &Path, out: Option<&Path>) -> Result<()> {
    encrypt_with(file, out, &mut TerminalPrompt::new())
        .await
        .map(|_| ())
}

fn default_output(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".enc");
    PathBuf::from(name)
}

pub async fn encrypt_with<P: Prompt>(file: &Path, out: Option<&Path>, prompt: &mut P) -> Result<PathBuf> {
    let plaintext =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let passphrase = prompt
        .new_password("bundle passphrase", PASSPHRASE_MIN_LEN)
        .await?;
    let bundle = cipher::encrypt(&plaintext, &passphrase);

    let out = out.map(Path::to_path_buf).unwrap_or_else(|| default_output(file));
    std::fs::write(&out, bundle).with_context(|| format!("Failed to write {}", out.display()))?;

    let keys = parse_dotenv(&String::from_utf8_lossy(&plaintext)).len();
    output::success(&format!("Encrypted {} keys to {}", keys, out.display()));
    output::info("Commit the .enc file as stacks/<stack>/.env.enc; never commit the plaintext.");
    Ok(out)
}

pub async fn show(registry: &Registry, stack: &str, reveal: bool) -> Result<()> {
    registry.stack(stack)?;
    let fetcher = HttpFetcher::new(&registry.remote.base_url)?;
    show_with(&fetcher, &mut TerminalPrompt::new(), stack, reveal)
        .await
        .map(|_| ())
}

/// Print the bundle's entries. Returns how many were shown.
pub async fn show_with<F, P>(fetcher: &F, prompt: &mut P, stack: &str, reveal: bool) -> Result<usize>
where
    F: Fetcher,
    P: Prompt,
{
    let mut secrets = SecretPipeline::new();
    let content = secrets
        .decrypt_stack(fetcher, prompt, stack)
        .await?
        .read()?;
    secrets.cleanup()?;

    let entries = parse_dotenv(&String::from_utf8_lossy(&content));
    if entries.is_empty() {
        output::info(&format!("No secrets for stack '{}'", stack));
        return Ok(0);
    }

    output::header(&format!("Secrets for stack '{}'", stack));
    for (key, value) in &entries {
        if reveal {
            println!("  {}={}", key, value);
        } else {
            println!("  {}={}", key, mask_value(value));
        }
    }
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::MapFetcher;
    use crate::secrets::cipher::tests::OPENSSL_BUNDLE;
    use crate::secrets::prompt::tests::ScriptedPrompt;

    #[tokio::test]
    async fn encrypt_writes_decryptable_bundle_next_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(".env");
        std::fs::write(&file, "TOKEN=abc\n").unwrap();
        let mut prompt = ScriptedPrompt::default();
        prompt.passwords.push_back("long-enough".to_string());

        let out = encrypt_with(&file, None, &mut prompt).await.unwrap();

        assert_eq!(out, dir.path().join(".env.enc"));
        let bundle = std::fs::read(&out).unwrap();
        assert!(bundle.starts_with(b"Salted__"));
        assert_eq!(cipher::decrypt(&bundle, "long-enough").unwrap(), b"TOKEN=abc\n");
    }

    #[tokio::test]
    async fn show_counts_entries() {
        let fetcher =
            MapFetcher::default().with("stacks/media/.env.enc", hex::decode(OPENSSL_BUNDLE).unwrap());
        let mut prompt = ScriptedPrompt::passphrases(&["correct-horse"]);

        let shown = show_with(&fetcher, &mut prompt, "media", false).await.unwrap();
        assert_eq!(shown, 2);
    }
}
