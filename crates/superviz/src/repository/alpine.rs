use super::{temp_path, RepositorySetup};
use crate::error::InstallError;
use crate::info::InstallInfo;
use std::sync::Arc;

const KEY_PATH: &str = "/etc/apk/keys/superviz.rsa.pub";
const REPOSITORIES: &str = "/etc/apk/repositories";

/// APK repository for Alpine Linux
#[derive(Debug, Clone)]
pub struct AlpineRepository {
    info: Arc<InstallInfo>,
}

impl AlpineRepository {
    /// Handler for the repository described by `info`
    pub fn new(info: Arc<InstallInfo>) -> Self {
        Self { info }
    }

    fn source_line(repo: &str) -> String {
        format!("{}/alpine/main", repo)
    }
}

impl RepositorySetup for AlpineRepository {
    fn name(&self) -> &'static str {
        "alpine"
    }

    fn configured_probe(&self) -> String {
        let repo = self.info.repository_url.trim_end_matches('/');
        format!("grep -qxF '{}' {}", Self::source_line(repo), REPOSITORIES)
    }

    fn commands(&self) -> Result<Vec<String>, InstallError> {
        let repo = self.info.validated_repository_url()?;
        let key = temp_path(".rsa.pub");
        Ok(vec![
            format!("curl -fsSL {}/alpine/superviz.rsa.pub -o {}", repo, key),
            format!("install -m 0644 {} {}", key, KEY_PATH),
            format!(
                "echo '{}' | tee -a {} > /dev/null",
                Self::source_line(repo),
                REPOSITORIES
            ),
            format!("rm -f {}", key),
            "apk update".to_string(),
        ])
    }
}
