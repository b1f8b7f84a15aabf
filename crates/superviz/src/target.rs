//! `user@host` install targets

use crate::error::InstallError;
use std::fmt;
use std::str::FromStr;

/// Remote account to provision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    /// Login user
    pub user: String,
    /// Hostname or IP
    pub host: String,
}

impl InstallTarget {
    /// Parse `user@host`, splitting at the first `@`
    pub fn parse(target: &str) -> Result<Self, InstallError> {
        let invalid = || InstallError::InvalidTarget {
            target: target.to_string(),
        };
        let (user, host) = target.split_once('@').ok_or_else(invalid)?;
        if user.trim().is_empty() || host.trim().is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            user: user.to_string(),
            host: host.to_string(),
        })
    }
}

impl FromStr for InstallTarget {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for InstallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}
