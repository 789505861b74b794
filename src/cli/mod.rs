use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod deploy;
pub mod init;
pub mod list;
pub mod secrets_cmd;
pub mod status;

#[derive(Parser)]
#[command(
    name = "pvestack",
    version,
    about = "Deploy homelab stacks into Proxmox LXC containers"
)]
pub struct Cli {
    /// Path to stacks.toml
    #[arg(short, long, default_value = "stacks.toml")]
    pub config: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Scaffold stacks.toml in the current directory
    Init,

    /// Provision a stack's container and deploy it
    Deploy {
        /// Stack name (pick from a menu if omitted)
        stack: Option<String>,
        /// Prompt for a new backup server admin password even if one is set
        #[arg(long)]
        rotate_admin: bool,
    },

    /// List stacks in the registry
    List,

    /// Show container state and last deployment
    Status {
        /// Stack name (all stacks if omitted)
        stack: Option<String>,
    },

    /// Work with encrypted secret bundles
    Secrets {
        #[command(subcommand)]
        action: SecretsAction,
    },
}

#[derive(Subcommand)]
pub enum SecretsAction {
    /// Encrypt a .env file into an OpenSSL-compatible bundle
    Encrypt {
        /// Plaintext .env file
        file: PathBuf,
        /// Output path (default: <FILE>.enc)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Fetch and decrypt a stack's bundle (values masked by default)
    Show {
        /// Stack name
        stack: String,
        /// Show actual values
        #[arg(long)]
        reveal: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deploy_takes_optional_stack() {
        let cli = Cli::try_parse_from(["pvestack", "deploy"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Deploy {
                stack: None,
                rotate_admin: false
            }
        ));

        let cli =
            Cli::try_parse_from(["pvestack", "-c", "lab.toml", "deploy", "backup", "--rotate-admin"])
                .unwrap();
        assert_eq!(cli.config, PathBuf::from("lab.toml"));
        match cli.command {
            Command::Deploy {
                stack,
                rotate_admin,
            } => {
                assert_eq!(stack.as_deref(), Some("backup"));
                assert!(rotate_admin);
            }
            _ => panic!("expected deploy"),
        }
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::try_parse_from(["pvestack", "-vv", "list"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, PathBuf::from("stacks.toml"));
    }

    #[test]
    fn secrets_encrypt_output_flag() {
        let cli = Cli::try_parse_from(["pvestack", "secrets", "encrypt", ".env", "-o", "out.enc"])
            .unwrap();
        match cli.command {
            Command::Secrets {
                action: SecretsAction::Encrypt { file, output },
            } => {
                assert_eq!(file, PathBuf::from(".env"));
                assert_eq!(output, Some(PathBuf::from("out.enc")));
            }
            _ => panic!("expected secrets encrypt"),
        }
    }
}
