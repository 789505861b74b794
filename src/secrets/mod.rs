pub mod cipher;
pub mod pipeline;
pub mod prompt;

use std::collections::BTreeMap;

pub use pipeline::SecretPipeline;
pub use prompt::{Prompt, TerminalPrompt};

/// Parse dotenv content into a sorted map. Comments and blank lines are skipped.
pub fn parse_dotenv(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.strip_prefix("export ").unwrap_or(line).split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// First 4 characters followed by `****`.
pub fn mask_value(value: &str) -> String {
    match value.char_indices().nth(4) {
        Some((idx, _)) => format!("{}****", &value[..idx]),
        None => "****".to_string(),
    }
}
