use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::engine::EngineSettings;
use crate::model::{AdmissionPolicy, ConflictPolicy};

const PREFIX: &str = "SLOTGUARD_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: String, value: String },
    #[error("{0} and {1} must be set together")]
    Unpaired(&'static str, &'static str),
}

/// Server settings read from `SLOTGUARD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub workload_policy: AdmissionPolicy,
    pub default_capacity_points: u32,
    pub default_event_points: u32,
    pub timetable_conflicts: ConflictPolicy,
}

impl Default for Config {
    fn default() -> Self {
        let engine = EngineSettings::default();
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            workload_policy: engine.workload_policy,
            default_capacity_points: engine.default_capacity_points,
            default_event_points: engine.default_event_points,
            timetable_conflicts: ConflictPolicy::Reject,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(&format!("{PREFIX}{name}")).filter(|v| !v.trim().is_empty())
        };
        let defaults = Config::default();

        let tls_cert = get("TLS_CERT");
        let tls_key = get("TLS_KEY");
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::Unpaired("SLOTGUARD_TLS_CERT", "SLOTGUARD_TLS_KEY"));
        }

        Ok(Self {
            port: parsed(get("PORT"), "PORT")?.unwrap_or(defaults.port),
            bind: get("BIND").unwrap_or(defaults.bind),
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            max_connections: parsed(get("MAX_CONNECTIONS"), "MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(get("COMPACT_THRESHOLD"), "COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(get("METRICS_PORT"), "METRICS_PORT")?,
            tls_cert,
            tls_key,
            workload_policy: with_parser(get("WORKLOAD_POLICY"), "WORKLOAD_POLICY", AdmissionPolicy::parse)?
                .unwrap_or(defaults.workload_policy),
            default_capacity_points: parsed(get("DEFAULT_CAPACITY_POINTS"), "DEFAULT_CAPACITY_POINTS")?
                .unwrap_or(defaults.default_capacity_points),
            default_event_points: parsed(get("DEFAULT_EVENT_POINTS"), "DEFAULT_EVENT_POINTS")?
                .unwrap_or(defaults.default_event_points),
            timetable_conflicts: with_parser(get("TIMETABLE_CONFLICTS"), "TIMETABLE_CONFLICTS", ConflictPolicy::parse)?
                .unwrap_or(defaults.timetable_conflicts),
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            workload_policy: self.workload_policy,
            default_capacity_points: self.default_capacity_points,
            default_event_points: self.default_event_points,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotguard.wal")
    }
}

fn parsed<T: FromStr>(value: Option<String>, name: &str) -> Result<Option<T>, ConfigError> {
    with_parser(value, name, |s| s.trim().parse().ok())
}

fn with_parser<T>(
    value: Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, ConfigError> {
    match value {
        None => Ok(None),
        Some(v) => parse(&v).map(Some).ok_or(ConfigError::Invalid {
            var: format!("{PREFIX}{name}"),
            value: v,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.port, 5433);
        assert_eq!(config.engine_settings(), EngineSettings::default());
        assert_eq!(config.wal_path(), PathBuf::from("./data/slotguard.wal"));
    }

    #[test]
    fn reads_overrides() {
        let config = from(&[
            ("SLOTGUARD_PORT", "6000"),
            ("SLOTGUARD_DATA_DIR", "/var/lib/slotguard"),
            ("SLOTGUARD_METRICS_PORT", "9100"),
            ("SLOTGUARD_WORKLOAD_POLICY", "hard_cap"),
            ("SLOTGUARD_DEFAULT_EVENT_POINTS", "5"),
            ("SLOTGUARD_TIMETABLE_CONFLICTS", "warn"),
        ])
        .unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.workload_policy, AdmissionPolicy::HardCap);
        assert_eq!(config.engine_settings().default_event_points, 5);
        assert_eq!(config.timetable_conflicts, ConflictPolicy::Warn);
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/slotguard/slotguard.wal"));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            from(&[("SLOTGUARD_PORT", "lots")]),
            Err(ConfigError::Invalid {
                var: "SLOTGUARD_PORT".into(),
                value: "lots".into()
            })
        );
        assert!(from(&[("SLOTGUARD_WORKLOAD_POLICY", "maybe")]).is_err());
    }

    #[test]
    fn tls_paths_come_in_pairs() {
        assert_eq!(
            from(&[("SLOTGUARD_TLS_CERT", "cert.pem")]),
            Err(ConfigError::Unpaired("SLOTGUARD_TLS_CERT", "SLOTGUARD_TLS_KEY"))
        );
        let config = from(&[
            ("SLOTGUARD_TLS_CERT", "cert.pem"),
            ("SLOTGUARD_TLS_KEY", "key.pem"),
        ])
        .unwrap();
        assert_eq!(config.tls_key.as_deref(), Some("key.pem"));
    }
}
