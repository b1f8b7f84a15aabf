use super::{temp_path, RepositorySetup};
use crate::error::InstallError;
use crate::info::InstallInfo;
use std::sync::Arc;

const KEYRING_DIR: &str = "/etc/apt/keyrings";
const KEYRING: &str = "/etc/apt/keyrings/superviz.gpg";
const SOURCE_LIST: &str = "/etc/apt/sources.list.d/superviz.list";

/// APT repository for Debian and Ubuntu
#[derive(Debug, Clone)]
pub struct DebianRepository {
    info: Arc<InstallInfo>,
}

impl DebianRepository {
    /// Handler for the repository described by `info`
    pub fn new(info: Arc<InstallInfo>) -> Self {
        Self { info }
    }
}

impl RepositorySetup for DebianRepository {
    fn name(&self) -> &'static str {
        "debian"
    }

    fn configured_probe(&self) -> String {
        format!("test -f {}", SOURCE_LIST)
    }

    fn commands(&self) -> Result<Vec<String>, InstallError> {
        let repo = self.info.validated_repository_url()?;
        let key = temp_path(".asc");
        Ok(vec![
            format!("curl -fsSL {}/gpg.key -o {}", repo, key),
            format!("install -d -m 0755 {}", KEYRING_DIR),
            format!("gpg --dearmor --yes -o {} {}", KEYRING, key),
            format!(
                "echo 'deb [signed-by={}] {}/apt stable main' | tee {} > /dev/null",
                KEYRING, repo, SOURCE_LIST
            ),
            format!("rm -f {}", key),
            "apt update".to_string(),
        ])
    }
}
