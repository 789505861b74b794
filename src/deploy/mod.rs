pub mod context;
pub mod steps;

use anyhow::Result;

use crate::config::StackKind;
use crate::fetch::Fetcher;
use crate::output;
use crate::provision::Provisioned;
use crate::pve::ContainerRuntime;
use crate::record::DeploymentRecord;
use crate::secrets::{Prompt, SecretPipeline};

use context::DeployContext;

/// Deploy one stack end to end.
///
/// Plaintext secrets decrypted on the way live in `secrets`; the caller owns
/// their cleanup so interrupted runs drop them too.
pub async fn run<R, F, P>(
    ctx: &DeployContext,
    runtime: &R,
    fetcher: &F,
    prompt: &mut P,
    secrets: &mut SecretPipeline,
) -> Result<DeploymentRecord>
where
    R: ContainerRuntime,
    F: Fetcher,
    P: Prompt,
{
    output::header(&format!(
        "Deploying {} to container {} ({})",
        ctx.stack.name,
        ctx.id(),
        ctx.ip()
    ));

    let previous = DeploymentRecord::read(&ctx.state_dir, &ctx.stack.name)?;

    let record = match ctx.stack.kind {
        StackKind::Docker => {
            deploy_docker(ctx, runtime, fetcher, prompt, secrets, previous.as_ref()).await?
        }
        StackKind::Backup => deploy_backup(ctx, runtime, prompt).await?,
    };

    println!();
    output::success(&format!("Deploy complete! {} is live.", ctx.stack.name));
    Ok(record)
}

async fn deploy_docker<R, F, P>(
    ctx: &DeployContext,
    runtime: &R,
    fetcher: &F,
    prompt: &mut P,
    secrets: &mut SecretPipeline,
    previous: Option<&DeploymentRecord>,
) -> Result<DeploymentRecord>
where
    R: ContainerRuntime,
    F: Fetcher,
    P: Prompt,
{
    let total = steps::DOCKER_STEPS;

    // Step 1: Container
    let provisioned = steps::provision(runtime, ctx, total).await?;

    // Step 2: Secrets
    let (env, secrets_sha) =
        steps::decrypt_secrets(secrets, fetcher, prompt, ctx, previous).await?;

    // Step 3: Config files
    steps::push_configs(runtime, fetcher, ctx).await?;

    // Step 4: Compose definition + .env
    let compose_sha = steps::push_compose(runtime, fetcher, ctx, &env, previous).await?;

    // Step 5: compose up
    steps::start_stack(runtime, ctx).await?;

    // Step 6: Record
    let mut record = new_record(ctx, provisioned);
    record.compose_sha256 = Some(compose_sha);
    record.secrets_sha256 = Some(secrets_sha);
    steps::write_record(ctx, &record, 6, total)?;

    Ok(record)
}

async fn deploy_backup<R, P>(ctx: &DeployContext, runtime: &R, prompt: &mut P) -> Result<DeploymentRecord>
where
    R: ContainerRuntime,
    P: Prompt,
{
    let total = steps::BACKUP_STEPS;

    // Step 1: Container
    let provisioned = steps::provision(runtime, ctx, total).await?;

    // Step 2: Backup server state machine
    let state = steps::configure_backup(runtime, prompt, ctx).await?;
    output::success(&format!("Backup server: {}", state));

    // Step 3: Record
    let record = new_record(ctx, provisioned);
    steps::write_record(ctx, &record, 3, total)?;

    Ok(record)
}

fn new_record(ctx: &DeployContext, provisioned: Provisioned) -> DeploymentRecord {
    DeploymentRecord::new(
        &ctx.stack.name,
        ctx.id(),
        &ctx.stack.hostname,
        &ctx.ip(),
        provisioned == Provisioned::Created,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::context::tests::ctx_for;
    use crate::error::{root_cause, DeployError};
    use crate::fetch::tests::MapFetcher;
    use crate::pve::fake::{fail, FakeRuntime};
    use crate::pve::ContainerState;
    use crate::secrets::cipher::tests::{OPENSSL_BUNDLE, OPENSSL_PLAINTEXT};
    use crate::secrets::prompt::tests::ScriptedPrompt;

    const COMPOSE: &str = "services:\n  jellyfin:\n    image: jellyfin/jellyfin\n";

    fn media_fetcher() -> MapFetcher {
        MapFetcher::default()
            .with("stacks/media/.env.enc", hex::decode(OPENSSL_BUNDLE).unwrap())
            .with("stacks/media/docker-compose.yml", COMPOSE)
            .with("config/promtail/config.yml", "host: {{HOSTNAME}}\n")
    }

    #[tokio::test]
    async fn docker_stack_runs_every_step_in_order() {
        let state = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let ctx = ctx_for("media", state.path().to_path_buf());
        let fake = FakeRuntime::with_container(101, ContainerState::Running);
        let fetcher = media_fetcher();
        let mut prompt = ScriptedPrompt::passphrases(&["correct-horse"]);
        let mut secrets = SecretPipeline::with_workdir(work.path());

        let record = run(&ctx, &fake, &fetcher, &mut prompt, &mut secrets)
            .await
            .unwrap();
        secrets.cleanup().unwrap();

        assert_eq!(fake.count("create"), 0);
        assert_eq!(
            fake.pushed_text(101, "/opt/media/.env").unwrap(),
            OPENSSL_PLAINTEXT
        );
        assert_eq!(
            fake.pushed_text(101, "/opt/media/docker-compose.yml").unwrap(),
            COMPOSE
        );
        assert_eq!(
            fake.pushed_text(101, "/opt/promtail/config.yml").unwrap(),
            "host: media\n"
        );

        let calls = fake.calls.borrow().clone();
        let config_push = calls
            .iter()
            .position(|c| c == "push 101 /opt/promtail/config.yml")
            .unwrap();
        let up = calls
            .iter()
            .position(|c| c.contains("docker compose up"))
            .unwrap();
        assert!(config_push < up);

        assert!(!record.created);
        assert_eq!(
            DeploymentRecord::read(state.path(), "media").unwrap().unwrap(),
            record
        );
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_bundle_stops_before_any_push() {
        let state = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let ctx = ctx_for("media", state.path().to_path_buf());
        let fake = FakeRuntime::with_container(101, ContainerState::Running);
        let fetcher = MapFetcher::default().with("stacks/media/docker-compose.yml", COMPOSE);
        let mut prompt = ScriptedPrompt::passphrases(&["correct-horse"]);
        let mut secrets = SecretPipeline::with_workdir(work.path());

        let err = run(&ctx, &fake, &fetcher, &mut prompt, &mut secrets)
            .await
            .unwrap_err();

        assert!(matches!(root_cause(&err), Some(DeployError::Fetch { .. })));
        assert_eq!(fake.count("push"), 0);
        assert_eq!(prompt.asked, 0);
        assert!(DeploymentRecord::read(state.path(), "media").unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_compose_up_leaves_no_record_or_plaintext() {
        let state = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let ctx = ctx_for("media", state.path().to_path_buf());
        let fake = FakeRuntime::with_container(101, ContainerState::Running);
        fake.on("docker compose up", fail("no space left on device"));
        let fetcher = media_fetcher();
        let mut prompt = ScriptedPrompt::passphrases(&["correct-horse"]);

        {
            let mut secrets = SecretPipeline::with_workdir(work.path());
            let err = run(&ctx, &fake, &fetcher, &mut prompt, &mut secrets)
                .await
                .unwrap_err();
            assert!(matches!(root_cause(&err), Some(DeployError::Tool { .. })));
        }

        assert!(DeploymentRecord::read(state.path(), "media").unwrap().is_none());
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn backup_stack_skips_docker_and_secrets() {
        let state = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let ctx = ctx_for("backup", state.path().to_path_buf());
        let fake = FakeRuntime::default();
        let mut prompt = ScriptedPrompt::default();
        prompt
            .passwords
            .push_back("correct-horse-battery".to_string());
        let mut secrets = SecretPipeline::with_workdir(work.path());

        let record = run(&ctx, &fake, &MapFetcher::default(), &mut prompt, &mut secrets)
            .await
            .unwrap();

        assert!(record.created);
        assert!(record.compose_sha256.is_none());
        assert_eq!(fake.count("create 110"), 1);
        assert!(!fake.execs().iter().any(|c| c.contains("docker")));
        assert!(fake.execs().iter().any(|c| c.contains("datastore create")));
    }
}
