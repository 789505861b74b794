use std::path::Path;

use anyhow::{bail, Context, Result};
use dialoguer::Input;
use minijinja::Environment;

const TEMPLATE: &str = include_str!("../../templates/stacks.toml.j2");

pub struct Answers {
    pub gateway: String,
    pub base_url: String,
    pub first_stack: String,
    pub first_octet: u8,
}

pub fn run(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        bail!("{} already exists", config_path.display());
    }

    let gateway: String = Input::new()
        .with_prompt("Gateway address")
        .default("192.168.1.1".to_string())
        .interact_text()?;

    let base_url: String = Input::new()
        .with_prompt("Base URL of the stack repository (raw files)")
        .interact_text()?;

    let first_stack: String = Input::new()
        .with_prompt("First stack name")
        .default("proxy".to_string())
        .interact_text()?;

    let first_octet: u8 = Input::new()
        .with_prompt("Last IP octet for that stack")
        .default(100)
        .interact_text()?;

    let content = render(&Answers {
        gateway,
        base_url,
        first_stack,
        first_octet,
    })?;

    std::fs::write(config_path, content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    crate::output::success(&format!("Created {}", config_path.display()));
    crate::output::info("Add a section per stack, then run `pvestack deploy <stack>`.");

    Ok(())
}

/// `192.168.1.1` -> `192.168.1`
fn network_prefix(gateway: &str) -> &str {
    gateway.rsplit_once('.').map(|(p, _)| p).unwrap_or(gateway)
}

pub fn render(answers: &Answers) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("stacks.toml", TEMPLATE)?;
    let tmpl = env.get_template("stacks.toml")?;
    let content = tmpl.render(minijinja::context! {
        prefix => network_prefix(&answers.gateway),
        gateway => &answers.gateway,
        base_url => &answers.base_url,
        first_stack => &answers.first_stack,
        first_octet => answers.first_octet,
    })?;
    Ok(content)
}
