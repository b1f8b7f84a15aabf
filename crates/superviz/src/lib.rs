//! # SuperViz
//!
//! Provisions the SuperViz package repository on a remote Linux host over
//! SSH, then hands back the native install command for the detected
//! distribution.
//!
//! A run connects through [`ssh::Client`], probes the distribution, decides
//! whether `sudo` is needed and executes the per-distribution setup commands
//! in order, writing progress lines to a caller-supplied writer.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use superviz_ssh as ssh;

/// Error types for install runs
pub mod error;

/// `user@host` targets
pub mod target;

/// Install configuration
pub mod config;

/// Repository and package metadata
pub mod info;

/// Distribution detection
pub mod detect;

/// Privilege escalation
pub mod sudo;

/// Sequential command execution
pub mod executor;

/// Per-distribution repository setup
pub mod repository;

/// Install orchestration
pub mod install;

#[cfg(test)]
mod testing;

pub use config::{validate_and_prepare_config, InstallConfig, DEFAULT_COMMAND_TIMEOUT};
pub use detect::{Distro, DistroDetector, PackageFamily, ProbeDetector};
pub use error::InstallError;
pub use executor::CommandExecutor;
pub use info::{get_install_info, InstallInfo};
pub use install::{Installer, InstallerBuilder};
pub use repository::{handler_for, RepositorySetup, SetupOptions, SetupOutcome};
pub use sudo::SudoHelper;
pub use target::InstallTarget;

/// Result type alias for install operations
pub type Result<T> = std::result::Result<T, InstallError>;
