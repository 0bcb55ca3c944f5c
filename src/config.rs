//! Layered configuration for `ledgerd`.
//!
//! Sources, highest wins:
//! 1. Environment variables (`LEDGERD_*`, `__` separates sections)
//! 2. `ledgerd.toml` in the working directory
//! 3. Built-in defaults
//!
//! `LEDGERD_ATTENDANCE__LATE_AFTER=08:15:00` maps to `attendance.late_after`.

use chrono::NaiveTime;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::ledger::attendance::CheckInPolicy;

pub const CONFIG_FILE_NAME: &str = "ledgerd.toml";
pub const DEFAULT_PHOTO_PLACEHOLDER: &str = "https://via.placeholder.com/150";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Figment(#[from] figment::Error),

    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct AttendanceConfig {
    /// Check-ins after this local time are recorded as `Late`.
    #[serde(default)]
    pub late_after: Option<NaiveTime>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BulkConfig {
    /// Upper bound on rows accepted by one bulk enrollment or grade call.
    pub max_rows: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self { max_rows: 5000 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// Workspace opened at startup, same as a `workspace.select` call.
    #[serde(default)]
    pub workspace: Option<PathBuf>,
    pub log_level: String,
    pub photo_placeholder: String,
    #[serde(default)]
    pub attendance: AttendanceConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            workspace: None,
            log_level: "warn".to_string(),
            photo_placeholder: DEFAULT_PHOTO_PLACEHOLDER.to_string(),
            attendance: AttendanceConfig::default(),
            bulk: BulkConfig::default(),
        }
    }
}

impl LedgerConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        let local_path = PathBuf::from(CONFIG_FILE_NAME);
        if local_path.exists() {
            figment = figment.merge(Toml::file(local_path));
        }

        figment.merge(Env::prefixed("LEDGERD_").split("__"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bulk.max_rows == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bulk.max_rows".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.photo_placeholder.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "photo_placeholder".into(),
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    pub fn check_in_policy(&self) -> CheckInPolicy {
        CheckInPolicy {
            late_after: self.attendance.late_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_apply_without_sources() {
        Jail::expect_with(|_jail| {
            let config = LedgerConfig::load().expect("defaults");
            assert_eq!(config, LedgerConfig::default());
            assert_eq!(config.bulk.max_rows, 5000);
            assert_eq!(config.check_in_policy(), CheckInPolicy::default());
            Ok(())
        });
    }

    #[test]
    fn toml_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE_NAME,
                r#"
                workspace = "/srv/school"
                log_level = "info"

                [attendance]
                late_after = "08:15:00"
                "#,
            )?;
            let config = LedgerConfig::load().expect("toml config");
            assert_eq!(config.workspace, Some(PathBuf::from("/srv/school")));
            assert_eq!(config.log_level, "info");
            assert_eq!(
                config.attendance.late_after,
                NaiveTime::from_hms_opt(8, 15, 0)
            );
            assert_eq!(config.photo_placeholder, DEFAULT_PHOTO_PLACEHOLDER);
            Ok(())
        });
    }

    #[test]
    fn env_beats_toml() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE_NAME, "[bulk]\nmax_rows = 100\n")?;
            jail.set_env("LEDGERD_BULK__MAX_ROWS", "20");
            jail.set_env("LEDGERD_LOG_LEVEL", "debug");
            let config = LedgerConfig::load().expect("env config");
            assert_eq!(config.bulk.max_rows, 20);
            assert_eq!(config.log_level, "debug");
            Ok(())
        });
    }

    #[test]
    fn zero_bulk_cap_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("LEDGERD_BULK__MAX_ROWS", "0");
            let err = LedgerConfig::load().expect_err("zero cap");
            assert!(matches!(err, ConfigError::InvalidValue { .. }));
            Ok(())
        });
    }
}
