//! Per-distribution repository setup
//!
//! Each handler produces a fixed, ordered command list (signing key, source
//! entry, index refresh). The shared [`RepositorySetup::setup`] flow checks
//! whether the repository is already configured, decides on sudo, and runs
//! the list through the [`CommandExecutor`].

use crate::detect::{probe, Distro};
use crate::error::InstallError;
use crate::executor::CommandExecutor;
use crate::info::InstallInfo;
use crate::sudo::SudoHelper;
use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;
use superviz_ssh::{CallContext, RemoteExecutor};
use tracing::info;
use uuid::Uuid;

mod alpine;
mod arch;
mod debian;
mod rhel;

pub use alpine::AlpineRepository;
pub use arch::ArchRepository;
pub use debian::DebianRepository;
pub use rhel::{RepoFileTemplate, RepositoryDescriptor, RhelRepository};

/// Per-run options for [`RepositorySetup::setup`]
#[derive(Debug, Clone, Copy)]
pub struct SetupOptions<'a> {
    /// `user@host`, for progress messages
    pub target: &'a str,
    /// Run the commands even if the repository looks configured
    pub force: bool,
    /// Executor for the command list
    pub executor: CommandExecutor,
}

/// What [`RepositorySetup::setup`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    /// All commands ran
    Configured,
    /// The repository was already present and `force` was off
    AlreadyConfigured,
}

/// Repository setup for one package manager family
#[async_trait]
pub trait RepositorySetup: Send + Sync {
    /// Handler name, for logs
    fn name(&self) -> &'static str;

    /// Read-only command that exits 0 when the repository is already set up
    fn configured_probe(&self) -> String;

    /// Commands to run, in order, without any sudo prefix
    ///
    /// All validation happens here, before anything touches the remote host.
    fn commands(&self) -> Result<Vec<String>, InstallError>;

    /// Configure the repository on the connected host
    async fn setup(
        &self,
        ctx: &CallContext,
        exec: &dyn RemoteExecutor,
        progress: &mut (dyn Write + Send),
        options: SetupOptions<'_>,
    ) -> Result<SetupOutcome, InstallError> {
        let commands = self.commands()?;

        if !options.force && probe(ctx, exec, &self.configured_probe()).await? {
            info!("{} repository already configured on {}", self.name(), options.target);
            writeln!(progress, "Repository already configured on {}", options.target)?;
            return Ok(SetupOutcome::AlreadyConfigured);
        }

        let needed = SudoHelper::is_needed(ctx, exec).await?;
        let commands = SudoHelper::add_prefix(&commands, needed);
        info!(
            "Configuring {} repository on {} ({} commands, sudo: {})",
            self.name(),
            options.target,
            commands.len(),
            needed
        );
        options.executor.run(ctx, exec, &commands, progress).await?;
        Ok(SetupOutcome::Configured)
    }
}

/// Handler for `distro`
pub fn handler_for(distro: Distro, info: Arc<InstallInfo>) -> Result<Box<dyn RepositorySetup>, InstallError> {
    let handler: Box<dyn RepositorySetup> = match distro {
        Distro::Ubuntu | Distro::Debian => Box::new(DebianRepository::new(info)),
        Distro::Alpine => Box::new(AlpineRepository::new(info)),
        Distro::Centos | Distro::Rhel | Distro::Fedora => Box::new(RhelRepository::new(info)),
        Distro::Arch => Box::new(ArchRepository::new(info)),
        Distro::Unknown => return Err(InstallError::UnsupportedDistribution(distro.id().to_string())),
    };
    Ok(handler)
}

/// Unique scratch path for a download
pub(crate) fn temp_path(suffix: &str) -> String {
    format!("/tmp/superviz-{}{}", Uuid::new_v4(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockRemote, Reply};

    fn options(force: bool) -> SetupOptions<'static> {
        SetupOptions {
            target: "testuser@test.example.com",
            force,
            executor: CommandExecutor::new(),
        }
    }

    #[test]
    fn test_handler_dispatch() {
        let info = Arc::new(InstallInfo::default());
        assert_eq!(handler_for(Distro::Ubuntu, info.clone()).unwrap().name(), "debian");
        assert_eq!(handler_for(Distro::Fedora, info.clone()).unwrap().name(), "rhel");
        assert_eq!(handler_for(Distro::Arch, info.clone()).unwrap().name(), "arch");
        assert!(matches!(
            handler_for(Distro::Unknown, info),
            Err(InstallError::UnsupportedDistribution(_))
        ));
    }

    #[test]
    fn test_temp_paths_are_unique() {
        let a = temp_path(".asc");
        let b = temp_path(".asc");
        assert!(a.starts_with("/tmp/superviz-"));
        assert!(a.ends_with(".asc"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_configured_repository_is_skipped() {
        let handler = DebianRepository::new(Arc::new(InstallInfo::default()));
        let remote = MockRemote::new().on(&handler.configured_probe(), Reply::Ok(String::new()));
        let mut out: Vec<u8> = Vec::new();

        let outcome = handler
            .setup(&CallContext::background(), &remote, &mut out, options(false))
            .await
            .unwrap();

        assert_eq!(outcome, SetupOutcome::AlreadyConfigured);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Repository already configured on testuser@test.example.com\n"
        );
        assert_eq!(remote.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_force_runs_commands_with_sudo() {
        let handler = DebianRepository::new(Arc::new(InstallInfo::default()));
        let remote = MockRemote::new()
            .on("test -w", Reply::Exit(1))
            .succeed_all();
        let mut out: Vec<u8> = Vec::new();

        let outcome = handler
            .setup(&CallContext::background(), &remote, &mut out, options(true))
            .await
            .unwrap();

        assert_eq!(outcome, SetupOutcome::Configured);
        let calls = remote.calls();
        assert!(!calls.contains(&handler.configured_probe()));
        assert!(calls.contains(&"sudo apt update".to_string()));
        let progress = String::from_utf8(out).unwrap();
        assert!(progress.contains("] sudo apt update\n"));
    }
}
