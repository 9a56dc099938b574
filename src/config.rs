use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::calendar::InstitutionCalendar;
use crate::engine::{EngineConfig, ResourceConflictPolicy};
use crate::model::{DEFAULT_HORIZON_DAYS, MINUTE_MS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("both TUTORBOOK_TLS_CERT and TUTORBOOK_TLS_KEY must be set, or neither")]
    PartialTls,
}

/// Server settings, read once from the environment at startup.
///
/// | Env Var                           | Default     |
/// |-----------------------------------|-------------|
/// | `TUTORBOOK_PORT`                  | `5433`      |
/// | `TUTORBOOK_BIND`                  | `0.0.0.0`   |
/// | `TUTORBOOK_DATA_DIR`              | `./data`    |
/// | `TUTORBOOK_PASSWORD`              | `tutorbook` |
/// | `TUTORBOOK_MAX_CONNECTIONS`       | `256`       |
/// | `TUTORBOOK_COMPACT_THRESHOLD`     | `1000`      |
/// | `TUTORBOOK_TLS_CERT` / `_TLS_KEY` | unset       |
/// | `TUTORBOOK_METRICS_PORT`          | unset       |
/// | `TUTORBOOK_UTC_OFFSET_MINUTES`    | `0`         |
/// | `TUTORBOOK_RESOURCE_SLOT_MINUTES` | unset (whole day) |
/// | `TUTORBOOK_DEFAULT_HORIZON_DAYS`  | `14`        |
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    pub utc_offset_minutes: i32,
    pub resource_slot_minutes: Option<u32>,
    pub default_horizon_days: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let tls_cert = lookup("TUTORBOOK_TLS_CERT");
        let tls_key = lookup("TUTORBOOK_TLS_KEY");
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::PartialTls);
        }

        let config = Self {
            port: parsed(&lookup, "TUTORBOOK_PORT")?.unwrap_or(5433),
            bind: lookup("TUTORBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: lookup("TUTORBOOK_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            password: lookup("TUTORBOOK_PASSWORD").unwrap_or_else(|| "tutorbook".into()),
            max_connections: parsed(&lookup, "TUTORBOOK_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: parsed(&lookup, "TUTORBOOK_COMPACT_THRESHOLD")?.unwrap_or(1000),
            tls_cert,
            tls_key,
            metrics_port: parsed(&lookup, "TUTORBOOK_METRICS_PORT")?,
            utc_offset_minutes: parsed(&lookup, "TUTORBOOK_UTC_OFFSET_MINUTES")?.unwrap_or(0),
            resource_slot_minutes: parsed(&lookup, "TUTORBOOK_RESOURCE_SLOT_MINUTES")?,
            default_horizon_days: parsed(&lookup, "TUTORBOOK_DEFAULT_HORIZON_DAYS")?
                .unwrap_or(DEFAULT_HORIZON_DAYS),
        };
        config.engine_config()?;
        Ok(config)
    }

    /// `(cert, key)` when TLS is configured.
    pub fn tls_files(&self) -> Option<(&Path, &Path)> {
        Some((Path::new(self.tls_cert.as_deref()?), Path::new(self.tls_key.as_deref()?)))
    }

    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let calendar = InstitutionCalendar::from_offset_minutes(self.utc_offset_minutes).ok_or_else(|| {
            ConfigError::Invalid {
                var: "TUTORBOOK_UTC_OFFSET_MINUTES",
                value: self.utc_offset_minutes.to_string(),
            }
        })?;
        let resource_policy = match self.resource_slot_minutes {
            None => ResourceConflictPolicy::CalendarDay,
            Some(0) => {
                return Err(ConfigError::Invalid {
                    var: "TUTORBOOK_RESOURCE_SLOT_MINUTES",
                    value: "0".into(),
                });
            }
            Some(minutes) => ResourceConflictPolicy::FixedDuration(i64::from(minutes) * MINUTE_MS),
        };
        if self.default_horizon_days == 0 || self.default_horizon_days > crate::limits::MAX_HORIZON_DAYS {
            return Err(ConfigError::Invalid {
                var: "TUTORBOOK_DEFAULT_HORIZON_DAYS",
                value: self.default_horizon_days.to_string(),
            });
        }
        Ok(EngineConfig {
            calendar,
            resource_policy,
            default_horizon_days: self.default_horizon_days,
        })
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError> {
    lookup(var)
        .map(|value| value.trim().parse().map_err(|_| ConfigError::Invalid { var, value }))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.port, 5433);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.compact_threshold, 1000);
        assert!(config.metrics_port.is_none());
        assert_eq!(config.engine_config().unwrap(), EngineConfig::default());
    }

    #[test]
    fn engine_settings_from_env() {
        let config = from_pairs(&[
            ("TUTORBOOK_UTC_OFFSET_MINUTES", "-300"),
            ("TUTORBOOK_RESOURCE_SLOT_MINUTES", "120"),
            ("TUTORBOOK_DEFAULT_HORIZON_DAYS", "7"),
        ])
        .unwrap();
        let engine = config.engine_config().unwrap();
        assert_eq!(engine.calendar.offset_ms(), -300 * MINUTE_MS);
        assert_eq!(engine.resource_policy, ResourceConflictPolicy::FixedDuration(120 * MINUTE_MS));
        assert_eq!(engine.default_horizon_days, 7);
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = from_pairs(&[("TUTORBOOK_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("TUTORBOOK_PORT"));
        assert!(from_pairs(&[("TUTORBOOK_RESOURCE_SLOT_MINUTES", "0")]).is_err());
        assert!(from_pairs(&[("TUTORBOOK_DEFAULT_HORIZON_DAYS", "365")]).is_err());
        assert!(from_pairs(&[("TUTORBOOK_UTC_OFFSET_MINUTES", "100000")]).is_err());
    }

    #[test]
    fn tls_needs_both_files() {
        assert!(matches!(
            from_pairs(&[("TUTORBOOK_TLS_CERT", "cert.pem")]),
            Err(ConfigError::PartialTls)
        ));
        let config = from_pairs(&[("TUTORBOOK_TLS_CERT", "cert.pem"), ("TUTORBOOK_TLS_KEY", "key.pem")]).unwrap();
        assert_eq!(config.tls_files(), Some((Path::new("cert.pem"), Path::new("key.pem"))));
        assert!(from_pairs(&[]).unwrap().tls_files().is_none());
    }
}
