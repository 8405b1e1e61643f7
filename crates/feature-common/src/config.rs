//! Engine configuration read from the process environment

#[cfg(test)]
use mockall::automock;

use crate::retry::RetryConfig;
use crate::{Error, DEFAULT_FIELD_MANAGER};

/// Maximum attempts for conflicting tracker status writes
pub const ENV_STATUS_MAX_ATTEMPTS: &str = "FEATURE_STATUS_MAX_ATTEMPTS";
/// Path or name of the kustomize binary used to build overlays
pub const ENV_KUSTOMIZE_BIN: &str = "FEATURE_KUSTOMIZE_BIN";
/// Field manager recorded on writes
pub const ENV_FIELD_MANAGER: &str = "FEATURE_FIELD_MANAGER";

/// Default kustomize binary, resolved through `PATH`
pub const DEFAULT_KUSTOMIZE_BIN: &str = "kustomize";

/// Source of configuration values
#[cfg_attr(test, automock)]
pub trait EnvSource: Send + Sync {
    /// Look up a variable, `None` when unset
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads from the process environment
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Runtime settings shared by every feature
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Retry policy for tracker status writes
    pub status_retry: RetryConfig,
    /// kustomize binary used for overlay builds
    pub kustomize_binary: String,
    /// Field manager recorded on writes
    pub field_manager: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            status_retry: RetryConfig::status_update(),
            kustomize_binary: DEFAULT_KUSTOMIZE_BIN.to_string(),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
        }
    }
}

impl EngineConfig {
    /// Build the configuration from environment variables, using defaults
    /// for anything unset
    pub fn from_env(env: &dyn EnvSource) -> Result<Self, Error> {
        let mut config = Self::default();

        if let Some(raw) = env.var(ENV_STATUS_MAX_ATTEMPTS) {
            let attempts: u32 = raw.trim().parse().map_err(|_| {
                Error::validation_for_field(
                    "engine-config",
                    ENV_STATUS_MAX_ATTEMPTS,
                    format!("expected a positive integer, got {:?}", raw),
                )
            })?;
            if attempts == 0 {
                return Err(Error::validation_for_field(
                    "engine-config",
                    ENV_STATUS_MAX_ATTEMPTS,
                    "status updates need at least one attempt",
                ));
            }
            config.status_retry.max_attempts = attempts;
        }

        if let Some(bin) = env.var(ENV_KUSTOMIZE_BIN).filter(|b| !b.is_empty()) {
            config.kustomize_binary = bin;
        }

        if let Some(manager) = env.var(ENV_FIELD_MANAGER).filter(|m| !m.is_empty()) {
            config.field_manager = manager;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let mut env = MockEnvSource::new();
        env.expect_var().returning(|_| None);

        let config = EngineConfig::from_env(&env).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.kustomize_binary, "kustomize");
        assert_eq!(config.status_retry.max_attempts, 5);
    }

    #[test]
    fn test_values_read_from_env() {
        let mut env = MockEnvSource::new();
        env.expect_var().returning(|key| match key {
            ENV_STATUS_MAX_ATTEMPTS => Some("9".to_string()),
            ENV_KUSTOMIZE_BIN => Some("/usr/local/bin/kustomize".to_string()),
            ENV_FIELD_MANAGER => Some("platform-operator".to_string()),
            _ => None,
        });

        let config = EngineConfig::from_env(&env).unwrap();
        assert_eq!(config.status_retry.max_attempts, 9);
        assert_eq!(config.kustomize_binary, "/usr/local/bin/kustomize");
        assert_eq!(config.field_manager, "platform-operator");
    }

    #[test]
    fn test_invalid_attempts_rejected() {
        for raw in ["many", "0", "-1"] {
            let mut env = MockEnvSource::new();
            let value = raw.to_string();
            env.expect_var().returning(move |key| {
                (key == ENV_STATUS_MAX_ATTEMPTS).then(|| value.clone())
            });

            let err = EngineConfig::from_env(&env).unwrap_err();
            assert!(matches!(err, Error::Validation { .. }), "{raw}");
        }
    }
}
