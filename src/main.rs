mod backup;
mod cli;
mod compose;
mod config;
mod deploy;
mod distribute;
mod error;
mod fetch;
mod output;
mod provision;
mod pve;
mod record;
mod retry;
mod secrets;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, SecretsAction};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            if e.downcast_ref::<cli::deploy::Interrupted>().is_some() {
                // a prompt thread may still be blocked on the terminal and
                // would hold up runtime shutdown
                std::process::exit(130);
            }
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init => {
            cli::init::run(&cli.config)?;
        }

        Command::Deploy {
            stack,
            rotate_admin,
        } => {
            let registry = config::Registry::load(&cli.config)?;
            cli::deploy::run(registry, stack.as_deref(), rotate_admin).await?;
        }

        Command::List => {
            let registry = config::Registry::load(&cli.config)?;
            cli::list::run(&registry)?;
        }

        Command::Status { stack } => {
            let registry = config::Registry::load(&cli.config)?;
            cli::status::run(registry, stack.as_deref()).await?;
        }

        Command::Secrets { action } => match action {
            SecretsAction::Encrypt { file, output } => {
                cli::secrets_cmd::encrypt(&file, output.as_deref()).await?;
            }
            SecretsAction::Show { stack, reveal } => {
                let registry = config::Registry::load(&cli.config)?;
                cli::secrets_cmd::show(&registry, &stack, reveal).await?;
            }
        },
    }

    Ok(())
}
