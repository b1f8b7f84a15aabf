//! Repository and package metadata

use crate::error::InstallError;
use serde::Serialize;
use url::Url;

/// Public package repository
pub const DEFAULT_REPOSITORY_URL: &str = "https://repo.superviz.io";

/// Package installed from the repository
pub const DEFAULT_PACKAGE_NAME: &str = "superviz";

/// Fingerprint of the repository signing key
pub const DEFAULT_GPG_KEY_ID: &str = "6B2F3A8E9C41D7E05A3C2B1F48E7D9A3C05B16F2";

/// What gets installed and from where
///
/// Built once and shared with every repository handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallInfo {
    /// Base URL of the package repository
    #[serde(rename = "repositoryURL")]
    pub repository_url: String,
    /// Package name
    pub package_name: String,
    /// Signing key id
    #[serde(rename = "gpgKeyID")]
    pub gpg_key_id: String,
    /// Installer version
    pub version: String,
}

impl Default for InstallInfo {
    fn default() -> Self {
        Self {
            repository_url: DEFAULT_REPOSITORY_URL.to_string(),
            package_name: DEFAULT_PACKAGE_NAME.to_string(),
            gpg_key_id: DEFAULT_GPG_KEY_ID.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl InstallInfo {
    /// Override the repository URL
    pub fn with_repository_url(mut self, url: impl Into<String>) -> Self {
        self.repository_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the signing key id
    pub fn with_gpg_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.gpg_key_id = key_id.into();
        self
    }

    /// Repository URL, checked before it is spliced into shell commands
    ///
    /// Must be an `https` URL with a host and no quoting or whitespace.
    pub fn validated_repository_url(&self) -> Result<&str, InstallError> {
        validate_https_url(&self.repository_url)?;
        Ok(self.repository_url.trim_end_matches('/'))
    }

    /// Signing key id, checked to be 8 to 40 hex digits
    pub fn validated_gpg_key_id(&self) -> Result<&str, InstallError> {
        let id = self.gpg_key_id.as_str();
        if (8..=40).contains(&id.len()) && id.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(id)
        } else {
            Err(InstallError::InvalidRepository(format!("malformed signing key id '{}'", id)))
        }
    }
}

pub(crate) fn validate_https_url(value: &str) -> Result<(), InstallError> {
    if value.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"' || c == '\\') {
        return Err(InstallError::InvalidRepository(format!(
            "URL '{}' contains quotes or whitespace",
            value.escape_debug()
        )));
    }
    let url = Url::parse(value)
        .map_err(|e| InstallError::InvalidRepository(format!("invalid URL '{}': {}", value, e)))?;
    if url.scheme() != "https" {
        return Err(InstallError::InvalidRepository(format!("URL '{}' must use https", value)));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(InstallError::InvalidRepository(format!("URL '{}' has no host", value)));
    }
    Ok(())
}

/// Install metadata with the built-in defaults
pub fn get_install_info() -> InstallInfo {
    InstallInfo::default()
}
