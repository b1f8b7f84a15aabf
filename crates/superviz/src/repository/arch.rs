use super::RepositorySetup;
use crate::error::InstallError;
use crate::info::InstallInfo;
use std::sync::Arc;

const PACMAN_CONF: &str = "/etc/pacman.conf";
const SECTION: &str = "[superviz]";

/// Pacman repository for Arch Linux
#[derive(Debug, Clone)]
pub struct ArchRepository {
    info: Arc<InstallInfo>,
}

impl ArchRepository {
    /// Handler for the repository described by `info`
    pub fn new(info: Arc<InstallInfo>) -> Self {
        Self { info }
    }
}

impl RepositorySetup for ArchRepository {
    fn name(&self) -> &'static str {
        "arch"
    }

    fn configured_probe(&self) -> String {
        format!("grep -qxF '{}' {}", SECTION, PACMAN_CONF)
    }

    fn commands(&self) -> Result<Vec<String>, InstallError> {
        let repo = self.info.validated_repository_url()?;
        let key_id = self.info.validated_gpg_key_id()?;
        Ok(vec![
            format!("pacman-key --recv-keys {}", key_id),
            format!("pacman-key --lsign-key {}", key_id),
            format!(
                "printf '%s\\n' '' '{}' 'Server = {}/arch/$arch' | tee -a {} > /dev/null",
                SECTION, repo, PACMAN_CONF
            ),
            "pacman -Sy".to_string(),
        ])
    }
}
