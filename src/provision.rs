use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::StackKind;
use crate::deploy::context::DeployContext;
use crate::output;
use crate::pve::{ContainerRuntime, ContainerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// Container was already there; nothing was created.
    Existing,
    Created,
}

/// Make sure the stack's container exists and is running.
///
/// An existing container is left exactly as it is apart from being started;
/// drift from the registry is not reconciled.
pub async fn ensure_container<R: ContainerRuntime>(
    runtime: &R,
    ctx: &DeployContext,
) -> Result<Provisioned> {
    let id = ctx.id();

    match runtime.state(id).await? {
        ContainerState::Running => {
            output::success(&format!(
                "Container {} already exists, skipping creation",
                id
            ));
            return Ok(Provisioned::Existing);
        }
        ContainerState::Created => {
            output::success(&format!(
                "Container {} already exists, skipping creation",
                id
            ));
            output::info(&format!("Starting stopped container {}", id));
            runtime.start(id).await?;
            wait_until_ready(runtime, ctx).await?;
            return Ok(Provisioned::Existing);
        }
        ContainerState::Absent => {}
    }

    let family = ctx.os_family();
    let storage = &ctx.registry.storage;

    let spinner = output::spinner("Resolving base image...");
    let template = runtime.latest_template(family).await;
    spinner.finish_and_clear();
    let template = template?;
    info!("Using template {}", template);

    let spinner = output::spinner(&format!("Fetching {}...", template));
    let downloaded = runtime.ensure_template(&storage.templates, &template).await;
    spinner.finish_and_clear();
    if downloaded? {
        output::success(&format!("Downloaded {}", template));
    }

    let spec = ctx.create_spec(&template);
    runtime
        .create(&spec)
        .await
        .with_context(|| format!("Failed to create container for stack '{}'", ctx.stack.name))?;
    output::success(&format!(
        "Created container {} ({}, {} cores, {} MB, {} GB)",
        id, ctx.stack.hostname, spec.cores, spec.memory_mb, spec.disk_gb
    ));

    if ctx.stack.shared_storage {
        if let Some(host_path) = storage.shared_host_path.as_deref() {
            runtime
                .attach_mount(id, host_path, &storage.shared_mount_path)
                .await?;
            output::success(&format!(
                "Mounted {} at {}",
                host_path, storage.shared_mount_path
            ));
        }
    } else {
        debug!("Stack '{}' opts out of shared storage", ctx.stack.name);
    }

    runtime.start(id).await?;
    wait_until_ready(runtime, ctx).await?;

    if ctx.stack.kind == StackKind::Docker {
        install_docker(runtime, ctx).await?;
    }

    Ok(Provisioned::Created)
}

async fn wait_until_ready<R: ContainerRuntime>(runtime: &R, ctx: &DeployContext) -> Result<()> {
    let id = ctx.id();
    let marker = ctx.os_family().init_marker();
    let spinner = output::spinner(&format!("Waiting for container {} to come up...", id));

    let ready = ctx
        .timings
        .container_ready
        .run(&format!("container {} not responsive", id), |_| async move {
            anyhow::Ok(runtime.path_exists(id, marker).await?.then_some(()))
        })
        .await;

    spinner.finish_and_clear();
    ready?;
    output::success(&format!("Container {} is up", id));
    Ok(())
}

async fn install_docker<R: ContainerRuntime>(runtime: &R, ctx: &DeployContext) -> Result<()> {
    let id = ctx.id();

    if runtime.exec_ok(id, "command -v docker").await? {
        output::success("Docker already installed");
        return Ok(());
    }

    let spinner = output::spinner("Installing Docker...");
    let installed = runtime
        .exec(id, ctx.os_family().install_docker_cmd())
        .await;
    spinner.finish_and_clear();
    installed.context("Failed to install Docker")?;

    output::success("Docker installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::context::tests::ctx_for;
    use crate::error::{root_cause, DeployError};
    use crate::pve::fake::{fail, ok, FakeRuntime};

    #[tokio::test]
    async fn existing_container_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_for("proxy", dir.path().to_path_buf());
        let fake = FakeRuntime::with_container(100, ContainerState::Running);

        let first = ensure_container(&fake, &ctx).await.unwrap();
        let second = ensure_container(&fake, &ctx).await.unwrap();

        assert_eq!(first, Provisioned::Existing);
        assert_eq!(second, Provisioned::Existing);
        assert_eq!(fake.count("create"), 0);
        assert_eq!(fake.count("state"), 2);
        assert_eq!(fake.calls.borrow().len(), 2);
    }

    #[tokio::test]
    async fn stopped_container_is_started_not_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_for("proxy", dir.path().to_path_buf());
        let fake = FakeRuntime::with_container(100, ContainerState::Created);

        let outcome = ensure_container(&fake, &ctx).await.unwrap();

        assert_eq!(outcome, Provisioned::Existing);
        assert_eq!(fake.count("create"), 0);
        assert_eq!(fake.count("latest_template"), 0);
        assert_eq!(fake.count("start 100"), 1);
        assert!(fake
            .execs()
            .contains(&"test -e /etc/alpine-release".to_string()));
        assert!(fake.execs().iter().all(|c| !c.contains("docker")));
    }

    #[tokio::test]
    async fn second_run_after_creation_does_not_create_again() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_for("proxy", dir.path().to_path_buf());
        let fake = FakeRuntime::default();
        fake.on("command -v docker", ok("/usr/bin/docker"));

        assert_eq!(
            ensure_container(&fake, &ctx).await.unwrap(),
            Provisioned::Created
        );
        assert_eq!(
            ensure_container(&fake, &ctx).await.unwrap(),
            Provisioned::Existing
        );
        assert_eq!(fake.count("create"), 1);
    }

    #[tokio::test]
    async fn creates_mounts_and_installs_docker() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_for("media", dir.path().to_path_buf());
        let fake = FakeRuntime::default();
        fake.on("command -v docker", fail(""));

        ensure_container(&fake, &ctx).await.unwrap();

        let calls = fake.calls.borrow().clone();
        assert!(calls.contains(&"create 101".to_string()));
        assert!(calls.contains(&"mount 101 /tank/shared /mnt/shared".to_string()));
        let start = calls.iter().position(|c| c == "start 101").unwrap();
        let mount = calls.iter().position(|c| c.starts_with("mount")).unwrap();
        assert!(mount < start);
        assert!(fake.execs().iter().any(|c| c.contains("apk add")));
    }

    #[tokio::test]
    async fn lightweight_stack_gets_no_shared_mount() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_for("proxy", dir.path().to_path_buf());
        let fake = FakeRuntime::default();

        ensure_container(&fake, &ctx).await.unwrap();

        assert_eq!(fake.count("mount"), 0);
    }

    #[tokio::test]
    async fn backup_stack_uses_debian_without_docker() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_for("backup", dir.path().to_path_buf());
        let fake = FakeRuntime::default();

        ensure_container(&fake, &ctx).await.unwrap();

        assert_eq!(fake.count("latest_template Debian"), 1);
        assert!(fake.execs().iter().all(|c| !c.contains("docker")));
        assert!(fake
            .execs()
            .contains(&"test -e /etc/debian_version".to_string()));
    }

    #[tokio::test]
    async fn unresponsive_container_is_fatal_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_for("media", dir.path().to_path_buf());
        let fake = FakeRuntime::default();
        fake.on("test -e /etc/alpine-release", fail(""));

        let err = ensure_container(&fake, &ctx).await.unwrap_err();

        assert!(matches!(
            root_cause(&err),
            Some(DeployError::Timeout { attempts: 3, .. })
        ));
        assert_eq!(fake.count("exec test -e"), 3);
        assert!(fake.execs().iter().all(|c| !c.contains("docker")));
    }
}
