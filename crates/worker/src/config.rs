// Processor configuration from environment variables

use std::time::Duration;

use eventhook_core::ZoneConfig;
use eventhook_directory::KeycloakConfig;

use crate::delivery::DeliveryConfig;
use crate::dispatch::DispatcherConfig;
use crate::scanner::{CommitMode, ScannerConfig};

/// Upper bound for the scan lookahead and lookback
pub const MAX_WINDOW_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Everything the worker binary needs to wire itself up
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    /// Apply the bundled schema on startup
    pub run_migrations: bool,
    pub zone: ZoneConfig,
    pub scanner: ScannerConfig,
    pub delivery: DeliveryConfig,
    pub dispatcher: DispatcherConfig,
    pub keycloak: KeycloakConfig,
}

impl ProcessorConfig {
    /// Read the configuration from the process environment
    ///
    /// Environment variables:
    /// - `DATABASE_URL` (required), `DATABASE_MAX_CONNECTIONS` (default 5), `RUN_MIGRATIONS` (default false)
    /// - `EVENT_PROCESSOR_RATE_MS` (default 60000), overridden per scan by
    ///   `START_SCAN_INTERVAL_MS` / `END_SCAN_INTERVAL_MS`
    /// - `START_LOOKAHEAD_SECS` (default 300), `END_LOOKBACK_SECS` (default 60), each at most one day
    /// - `END_MARKER_COMMIT`: `atomic` (default) or `per_event`
    /// - `APP_TIME_ZONE` (default UTC)
    /// - `WEBHOOK_TIMEOUT_SECS` (10), `WEBHOOK_MAX_CONCURRENCY` (8), `WEBHOOK_MAX_IN_FLIGHT` (16),
    ///   `WEBHOOK_QUEUE_CAPACITY` (64), `SHUTDOWN_TIMEOUT_SECS` (30)
    /// - `KEYCLOAK_URL`, `KEYCLOAK_REALM`, `KEYCLOAK_CLIENT_ID`, `KEYCLOAK_CLIENT_SECRET` (required)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let rate_ms: u64 = env.parse_or("EVENT_PROCESSOR_RATE_MS", 60_000)?;
        let start_ms: u64 = env.parse_or("START_SCAN_INTERVAL_MS", rate_ms)?;
        let end_ms: u64 = env.parse_or("END_SCAN_INTERVAL_MS", rate_ms)?;
        for (name, value) in [
            ("EVENT_PROCESSOR_RATE_MS", rate_ms),
            ("START_SCAN_INTERVAL_MS", start_ms),
            ("END_SCAN_INTERVAL_MS", end_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    name,
                    reason: "interval must be greater than zero".to_string(),
                });
            }
        }

        let start_lookahead = env.window_secs("START_LOOKAHEAD_SECS", 300)?;
        let end_lookback = env.window_secs("END_LOOKBACK_SECS", 60)?;

        let end_commit: CommitMode = env.parse_or("END_MARKER_COMMIT", CommitMode::Atomic)?;

        let zone = match env.get("APP_TIME_ZONE") {
            Some(name) => ZoneConfig::parse(&name).map_err(|reason| ConfigError::Invalid {
                name: "APP_TIME_ZONE",
                reason,
            })?,
            None => ZoneConfig::utc(),
        };

        let timeout = Duration::from_secs(env.parse_or("WEBHOOK_TIMEOUT_SECS", 10)?);

        let keycloak = KeycloakConfig::new(
            env.require("KEYCLOAK_URL")?,
            env.require("KEYCLOAK_REALM")?,
            env.require("KEYCLOAK_CLIENT_ID")?,
            env.require("KEYCLOAK_CLIENT_SECRET")?,
        )
        .with_timeout(timeout);

        Ok(Self {
            database_url: env.require("DATABASE_URL")?,
            database_max_connections: env.parse_or("DATABASE_MAX_CONNECTIONS", 5)?,
            run_migrations: env.parse_or("RUN_MIGRATIONS", false)?,
            zone,
            scanner: ScannerConfig::default()
                .with_intervals(Duration::from_millis(start_ms), Duration::from_millis(end_ms))
                .with_start_lookahead(start_lookahead)
                .with_end_lookback(end_lookback)
                .with_end_commit(end_commit),
            delivery: DeliveryConfig::default()
                .with_timeout(timeout)
                .with_max_in_flight(env.parse_or("WEBHOOK_MAX_IN_FLIGHT", 16)?),
            dispatcher: DispatcherConfig::default()
                .with_max_concurrency(env.parse_or("WEBHOOK_MAX_CONCURRENCY", 8)?)
                .with_queue_capacity(env.parse_or("WEBHOOK_QUEUE_CAPACITY", 64)?)
                .with_shutdown_timeout(Duration::from_secs(env.parse_or("SHUTDOWN_TIMEOUT_SECS", 30)?)),
            keycloak,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Value of `name`, with blank values treated as unset
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn require(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    /// Scan window length in seconds, within `0..=MAX_WINDOW_SECS`
    fn window_secs(&self, name: &'static str, default: i64) -> Result<chrono::Duration, ConfigError> {
        let secs: i64 = self.parse_or(name, default)?;
        if !(0..=MAX_WINDOW_SECS).contains(&secs) {
            return Err(ConfigError::Invalid {
                name,
                reason: format!("{} is outside 0..={} seconds", secs, MAX_WINDOW_SECS),
            });
        }
        chrono::Duration::try_seconds(secs).ok_or(ConfigError::Invalid {
            name,
            reason: format!("{} seconds is out of range", secs),
        })
    }

    fn parse_or<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: format!("'{}': {}", raw, e),
            }),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn required() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DATABASE_URL", "postgres://localhost/bookings"),
            ("KEYCLOAK_URL", "https://sso.example.org"),
            ("KEYCLOAK_REALM", "bookings"),
            ("KEYCLOAK_CLIENT_ID", "notifier"),
            ("KEYCLOAK_CLIENT_SECRET", "s3cret"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<ProcessorConfig, ConfigError> {
        ProcessorConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = load(&required()).unwrap();

        assert_eq!(config.database_max_connections, 5);
        assert!(!config.run_migrations);
        assert_eq!(config.zone, ZoneConfig::utc());
        assert_eq!(config.scanner.start_interval, Duration::from_secs(60));
        assert_eq!(config.scanner.end_interval, Duration::from_secs(60));
        assert_eq!(config.scanner.start_lookahead, chrono::Duration::minutes(5));
        assert_eq!(config.scanner.end_lookback, chrono::Duration::minutes(1));
        assert_eq!(config.scanner.end_commit, CommitMode::Atomic);
        assert_eq!(config.delivery.timeout, Duration::from_secs(10));
        assert_eq!(config.delivery.max_in_flight, 16);
        assert_eq!(config.dispatcher.max_concurrency, 8);
        assert_eq!(config.dispatcher.queue_capacity, 64);
        assert_eq!(config.keycloak.realm, "bookings");
    }

    #[test]
    fn test_rate_fallback_and_overrides() {
        let mut vars = required();
        vars.insert("EVENT_PROCESSOR_RATE_MS", "30000");
        vars.insert("END_SCAN_INTERVAL_MS", "15000");
        vars.insert("END_MARKER_COMMIT", "per_event");
        vars.insert("APP_TIME_ZONE", "Europe/Rome");

        let config = load(&vars).unwrap();
        assert_eq!(config.scanner.start_interval, Duration::from_secs(30));
        assert_eq!(config.scanner.end_interval, Duration::from_secs(15));
        assert_eq!(config.scanner.end_commit, CommitMode::PerEvent);
        assert_eq!(config.zone.tz(), chrono_tz::Europe::Rome);
    }

    #[test]
    fn test_missing_required() {
        let mut vars = required();
        vars.remove("KEYCLOAK_REALM");
        assert!(matches!(load(&vars), Err(ConfigError::Missing("KEYCLOAK_REALM"))));
    }

    #[test]
    fn test_invalid_values() {
        let mut vars = required();
        vars.insert("START_SCAN_INTERVAL_MS", "0");
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { name: "START_SCAN_INTERVAL_MS", .. })
        ));

        let mut vars = required();
        vars.insert("APP_TIME_ZONE", "Middle/Earth");
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { name: "APP_TIME_ZONE", .. })
        ));

        let mut vars = required();
        vars.insert("START_LOOKAHEAD_SECS", "-1");
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { name: "START_LOOKAHEAD_SECS", .. })
        ));

        let mut vars = required();
        vars.insert("WEBHOOK_MAX_CONCURRENCY", "many");
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { name: "WEBHOOK_MAX_CONCURRENCY", .. })
        ));
    }

    #[test]
    fn test_window_bounds() {
        let mut vars = required();
        vars.insert("START_LOOKAHEAD_SECS", "9223372036854775807");
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { name: "START_LOOKAHEAD_SECS", .. })
        ));

        let mut vars = required();
        vars.insert("END_LOOKBACK_SECS", "86401");
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { name: "END_LOOKBACK_SECS", .. })
        ));

        let mut vars = required();
        vars.insert("START_LOOKAHEAD_SECS", "86400");
        vars.insert("END_LOOKBACK_SECS", "0");
        let config = load(&vars).unwrap();
        assert_eq!(config.scanner.start_lookahead, chrono::Duration::days(1));
        assert_eq!(config.scanner.end_lookback, chrono::Duration::zero());
    }
}
