//! Engine configuration (spec §6). Every knob has a default matching the
//! spec's configuration table so `EngineConfig::default()` boots a usable
//! engine with no configuration at all.

use std::time::Duration;

use crate::password::{LockoutPolicy, PasswordPolicy};

/// `directory.*` (spec §6).
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub base_dn: String,
    pub root_dn: String,
    pub root_password: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_dn: "dc=example,dc=com".to_string(),
            root_dn: "cn=admin,dc=example,dc=com".to_string(),
            root_password: "admin".to_string(),
        }
    }
}

/// `security.*` (spec §6): rate limiting and password policy.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    pub rate_limit: LockoutPolicy,
    pub password_policy: PasswordPolicy,
}

/// Top-level engine configuration (spec §6). Construct with
/// `EngineConfig::default()` and override individual fields, mirroring the
/// teacher's boot-args builder style.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub directory: DirectoryConfig,
    pub security: SecurityConfig,
}

impl EngineConfig {
    pub fn lockout_duration(&self) -> Duration {
        self.security.rate_limit.lockout_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_base_dn() {
        let config = EngineConfig::default();
        assert_eq!(config.directory.base_dn, "dc=example,dc=com");
        assert!(config.security.rate_limit.enabled);
    }
}
