//! Linux distribution detection
//!
//! Detection only looks at exit statuses: a probe that exits 0 is a match.
//! `/etc/os-release` is consulted first, then the presence of package
//! manager binaries.

use crate::error::InstallError;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use superviz_ssh::{CallContext, RemoteExecutor};
use tracing::{debug, info};

/// Identification file probed first
pub const OS_RELEASE: &str = "/etc/os-release";

/// Supported distributions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Distro {
    /// Ubuntu
    Ubuntu,
    /// Debian
    Debian,
    /// Alpine Linux
    Alpine,
    /// CentOS
    Centos,
    /// Red Hat Enterprise Linux
    Rhel,
    /// Fedora
    Fedora,
    /// Arch Linux
    Arch,
    /// Nothing matched
    Unknown,
}

/// Package manager family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFamily {
    /// apt / dpkg
    Apt,
    /// apk
    Apk,
    /// yum / dnf
    Yum,
    /// pacman
    Pacman,
}

impl Distro {
    /// Distributions probed in `/etc/os-release`
    pub const PROBED: [Distro; 7] = [
        Distro::Ubuntu,
        Distro::Debian,
        Distro::Alpine,
        Distro::Centos,
        Distro::Rhel,
        Distro::Fedora,
        Distro::Arch,
    ];

    /// `ID` value in `/etc/os-release`
    pub fn id(&self) -> &'static str {
        match self {
            Self::Ubuntu => "ubuntu",
            Self::Debian => "debian",
            Self::Alpine => "alpine",
            Self::Centos => "centos",
            Self::Rhel => "rhel",
            Self::Fedora => "fedora",
            Self::Arch => "arch",
            Self::Unknown => "unknown",
        }
    }

    /// Package manager family, `None` for [`Distro::Unknown`]
    pub fn family(&self) -> Option<PackageFamily> {
        match self {
            Self::Ubuntu | Self::Debian => Some(PackageFamily::Apt),
            Self::Alpine => Some(PackageFamily::Apk),
            Self::Centos | Self::Rhel | Self::Fedora => Some(PackageFamily::Yum),
            Self::Arch => Some(PackageFamily::Pacman),
            Self::Unknown => None,
        }
    }

    /// Command the user runs to install `package` once the repository is set up
    pub fn install_command(&self, package: &str) -> Option<String> {
        let command = match self {
            Self::Ubuntu | Self::Debian => format!("sudo apt update && sudo apt install {}", package),
            Self::Alpine => format!("sudo apk update && sudo apk add {}", package),
            Self::Centos | Self::Rhel => format!("sudo yum install -y {}", package),
            Self::Fedora => format!("sudo dnf install -y {}", package),
            Self::Arch => format!("sudo pacman -Sy {}", package),
            Self::Unknown => return None,
        };
        Some(command)
    }

    fn os_release_probe(&self) -> String {
        format!("grep -qE '^ID=\"?{}\"?$' {}", self.id(), OS_RELEASE)
    }
}

impl fmt::Display for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Package manager binaries probed when `/etc/os-release` gives no answer,
/// most likely first
const PACKAGE_MANAGER_PROBES: [(&str, Distro); 4] = [
    ("apt", Distro::Debian),
    ("apk", Distro::Alpine),
    ("yum", Distro::Rhel),
    ("pacman", Distro::Arch),
];

/// Identifies the distribution of a connected host
#[async_trait]
pub trait DistroDetector: Send + Sync {
    /// Detect the distribution; nothing matching is a
    /// [`InstallError::DetectionFailed`] error
    async fn detect(&self, ctx: &CallContext, exec: &dyn RemoteExecutor) -> Result<Distro, InstallError>;
}

/// Detector based on read-only probe commands
#[derive(Debug, Default, Clone, Copy)]
pub struct ProbeDetector;

impl ProbeDetector {
    /// Create a detector
    pub fn new() -> Self {
        Self
    }
}

/// Run a read-only probe; a non-zero exit is a negative answer, any other
/// failure aborts
pub(crate) async fn probe(
    ctx: &CallContext,
    exec: &dyn RemoteExecutor,
    command: &str,
) -> Result<bool, InstallError> {
    match exec.execute(ctx, command).await {
        Ok(_) => Ok(true),
        Err(e) if e.remote_exit().is_some() => Ok(false),
        Err(e) => Err(InstallError::Remote(e)),
    }
}

#[async_trait]
impl DistroDetector for ProbeDetector {
    async fn detect(&self, ctx: &CallContext, exec: &dyn RemoteExecutor) -> Result<Distro, InstallError> {
        if probe(ctx, exec, &format!("test -f {}", OS_RELEASE)).await? {
            for distro in Distro::PROBED {
                if probe(ctx, exec, &distro.os_release_probe()).await? {
                    info!("Detected {} from {}", distro, OS_RELEASE);
                    return Ok(distro);
                }
            }
            debug!("{} present but no known ID matched", OS_RELEASE);
        }

        for (binary, distro) in PACKAGE_MANAGER_PROBES {
            if probe(ctx, exec, &format!("command -v {}", binary)).await? {
                info!("Detected {} from package manager {}", distro, binary);
                return Ok(distro);
            }
        }

        Err(InstallError::DetectionFailed {
            distro: Distro::Unknown.id().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockRemote, Reply};

    fn ok() -> Reply {
        Reply::Ok(String::new())
    }

    #[tokio::test]
    async fn test_detects_ubuntu_from_os_release() {
        let remote = MockRemote::new()
            .on("test -f /etc/os-release", ok())
            .on("ID=\"?ubuntu", ok());

        let distro = ProbeDetector::new()
            .detect(&CallContext::background(), &remote)
            .await
            .unwrap();

        assert_eq!(distro, Distro::Ubuntu);
        assert!(remote.calls().iter().all(|c| !c.starts_with("command -v")));
    }

    #[tokio::test]
    async fn test_falls_back_to_package_manager() {
        let remote = MockRemote::new().on("command -v pacman", ok());

        let distro = ProbeDetector::new()
            .detect(&CallContext::background(), &remote)
            .await
            .unwrap();

        assert_eq!(distro, Distro::Arch);
        let calls = remote.calls();
        assert_eq!(calls[0], "test -f /etc/os-release");
        assert_eq!(calls.last().map(String::as_str), Some("command -v pacman"));
    }

    #[tokio::test]
    async fn test_unmatched_os_release_falls_back() {
        let remote = MockRemote::new()
            .on("test -f /etc/os-release", ok())
            .on("command -v apk", ok());

        let distro = ProbeDetector::new()
            .detect(&CallContext::background(), &remote)
            .await
            .unwrap();
        assert_eq!(distro, Distro::Alpine);
    }

    #[tokio::test]
    async fn test_nothing_matches_is_detection_failure() {
        let remote = MockRemote::new();

        let err = ProbeDetector::new()
            .detect(&CallContext::background(), &remote)
            .await
            .unwrap_err();

        match err {
            InstallError::DetectionFailed { distro } => assert_eq!(distro, "unknown"),
            other => panic!("expected DetectionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_broken_transport_aborts_detection() {
        let remote = MockRemote::new()
            .on("test -f /etc/os-release", ok())
            .on("ID=", Reply::Broken);

        let err = ProbeDetector::new()
            .detect(&CallContext::background(), &remote)
            .await
            .unwrap_err();

        assert!(err.is(superviz_ssh::ErrorKind::SessionCreation));
        assert_eq!(remote.calls().len(), 2);
    }

    #[test]
    fn test_install_commands() {
        assert_eq!(
            Distro::Ubuntu.install_command("superviz").as_deref(),
            Some("sudo apt update && sudo apt install superviz")
        );
        assert_eq!(Distro::Arch.family(), Some(PackageFamily::Pacman));
        assert_eq!(Distro::Unknown.install_command("superviz"), None);
        assert_eq!(serde_json::to_string(&Distro::Rhel).unwrap(), "\"rhel\"");
    }

    #[test]
    fn test_os_release_probe_accepts_quoted_ids() {
        assert_eq!(
            Distro::Centos.os_release_probe(),
            "grep -qE '^ID=\"?centos\"?$' /etc/os-release"
        );
    }
}
