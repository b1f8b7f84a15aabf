use super::RepositorySetup;
use crate::error::InstallError;
use crate::info::{validate_https_url, InstallInfo};
use std::sync::Arc;

const REPO_FILE: &str = "/etc/yum.repos.d/superviz.repo";

/// One `[section]` of a yum `.repo` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDescriptor {
    /// Section id and display name
    pub name: String,
    /// `baseurl`
    pub base_url: String,
    /// `gpgkey`
    pub gpg_key_url: String,
    /// `enabled`
    pub enabled: bool,
    /// `gpgcheck`
    pub gpg_check: bool,
}

impl RepositoryDescriptor {
    /// Descriptor for the repository in `info`
    pub fn from_info(info: &InstallInfo) -> Self {
        let repo = info.repository_url.trim_end_matches('/');
        Self {
            name: info.package_name.clone(),
            base_url: format!("{}/rpm/$basearch", repo),
            gpg_key_url: format!("{}/gpg.key", repo),
            enabled: true,
            gpg_check: true,
        }
    }

    /// Reject anything that cannot be written safely into the file or a
    /// single-quoted shell word
    pub fn validate(&self) -> Result<(), InstallError> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(InstallError::InvalidRepository(format!(
                "repository name '{}' must be non-empty and alphanumeric",
                self.name.escape_debug()
            )));
        }
        validate_https_url(&self.base_url)?;
        validate_https_url(&self.gpg_key_url)
    }
}

/// Renders a [`RepositoryDescriptor`] as `.repo` file lines
#[derive(Debug, Clone, Copy, Default)]
pub struct RepoFileTemplate;

impl RepoFileTemplate {
    /// File lines, without trailing newlines
    pub fn render(&self, repo: &RepositoryDescriptor) -> Vec<String> {
        vec![
            format!("[{}]", repo.name),
            format!("name={}", repo.name),
            format!("baseurl={}", repo.base_url),
            format!("enabled={}", u8::from(repo.enabled)),
            format!("gpgcheck={}", u8::from(repo.gpg_check)),
            format!("gpgkey={}", repo.gpg_key_url),
        ]
    }
}

/// YUM/DNF repository for CentOS, RHEL and Fedora
#[derive(Debug, Clone)]
pub struct RhelRepository {
    descriptor: RepositoryDescriptor,
}

impl RhelRepository {
    /// Handler for the repository described by `info`
    pub fn new(info: Arc<InstallInfo>) -> Self {
        Self::with_descriptor(RepositoryDescriptor::from_info(&info))
    }

    /// Handler for an explicit descriptor
    pub fn with_descriptor(descriptor: RepositoryDescriptor) -> Self {
        Self { descriptor }
    }
}

impl RepositorySetup for RhelRepository {
    fn name(&self) -> &'static str {
        "rhel"
    }

    fn configured_probe(&self) -> String {
        format!("test -f {}", REPO_FILE)
    }

    fn commands(&self) -> Result<Vec<String>, InstallError> {
        self.descriptor.validate()?;
        let lines: Vec<String> = RepoFileTemplate
            .render(&self.descriptor)
            .into_iter()
            .map(|line| format!("'{}'", line))
            .collect();
        Ok(vec![
            format!("rpm --import {}", self.descriptor.gpg_key_url),
            format!("printf '%s\\n' {} | tee {} > /dev/null", lines.join(" "), REPO_FILE),
            "yum makecache".to_string(),
        ])
    }
}
