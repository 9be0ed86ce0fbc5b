// Time source and zone normalization
//
// The application runs in one configured time zone. It is loaded once at
// startup into a ZoneConfig and handed to everything that needs "now" or needs
// to normalize a stored instant.

use std::str::FromStr;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;

/// The fixed time zone every timestamp is normalized to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneConfig {
    tz: Tz,
}

impl ZoneConfig {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Zone config for UTC
    pub fn utc() -> Self {
        Self { tz: Tz::UTC }
    }

    /// Parse an IANA zone name (e.g. "Europe/Rome")
    pub fn parse(name: &str) -> Result<Self, String> {
        Tz::from_str(name.trim())
            .map(Self::new)
            .map_err(|e| format!("unknown time zone '{}': {}", name, e))
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Re-express an instant in the configured zone (same instant, new offset)
    pub fn normalize<Z: TimeZone>(&self, instant: &DateTime<Z>) -> DateTime<Tz> {
        instant.with_timezone(&self.tz)
    }

    /// Render an instant with the configured zone's numeric offset
    pub fn to_offset<Z: TimeZone>(&self, instant: &DateTime<Z>) -> DateTime<FixedOffset> {
        self.normalize(instant).fixed_offset()
    }

    /// RFC 3339 rendering used in log lines
    pub fn format<Z: TimeZone>(&self, instant: &DateTime<Z>) -> String {
        self.to_offset(instant).to_rfc3339()
    }
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self::utc()
    }
}

/// Supplies the current instant, normalized to the configured zone
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Tz>;

    fn zone(&self) -> ZoneConfig;
}

/// Wall-clock time source
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource {
    zone: ZoneConfig,
}

impl SystemTimeSource {
    pub fn new(zone: ZoneConfig) -> Self {
        Self { zone }
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Tz> {
        self.zone.normalize(&Utc::now())
    }

    fn zone(&self) -> ZoneConfig {
        self.zone
    }
}

/// Manually driven time source for tests and replays
#[derive(Debug)]
pub struct FixedTimeSource {
    zone: ZoneConfig,
    now: Mutex<DateTime<Tz>>,
}

impl FixedTimeSource {
    pub fn new<Z: TimeZone>(zone: ZoneConfig, now: DateTime<Z>) -> Self {
        Self {
            zone,
            now: Mutex::new(zone.normalize(&now)),
        }
    }

    pub fn set<Z: TimeZone>(&self, now: DateTime<Z>) {
        *self.now.lock() = self.zone.normalize(&now);
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> DateTime<Tz> {
        *self.now.lock()
    }

    fn zone(&self) -> ZoneConfig {
        self.zone
    }
}
