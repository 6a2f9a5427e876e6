// ── Device access domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use super::ids::MacAddress;

/// A host record as returned by the device directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub mac: MacAddress,
    pub ip: Option<Ipv4Addr>,
    /// Whether the device is under active monitoring (spoofing).
    #[serde(default)]
    pub monitored: bool,
}

/// How a device is granted tunnel access.
///
/// Only DHCP assignment is implemented. Any other requested mode is kept
/// verbatim so it can be reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AccessMode {
    Dhcp,
    Unsupported(String),
}

impl AccessMode {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("dhcp") {
            Self::Dhcp
        } else {
            Self::Unsupported(raw.to_owned())
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dhcp => f.write_str("dhcp"),
            Self::Unsupported(raw) => f.write_str(raw),
        }
    }
}

impl From<String> for AccessMode {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<AccessMode> for String {
    fn from(mode: AccessMode) -> Self {
        mode.to_string()
    }
}

/// Result of an enable request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum AccessOutcome {
    /// Eligible and monitored: traffic now routes through the tunnel.
    RuleInstalled,
    /// Eligible but not monitored: recorded, no rule.
    NotMonitored,
    /// Not eligible (outside the overlay subnet without DHCP spoofing, or
    /// no address): recorded, access suspended.
    Suspended,
    /// Requested mode is not supported: nothing recorded.
    UnsupportedMode,
}

/// A device currently granted tunnel access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnabledDevice {
    pub mac: MacAddress,
    pub mode: AccessMode,
    /// Tunnel interface the device is bound to.
    pub interface: String,
    /// Directory record as of the last enable or reconciliation pass.
    pub snapshot: DeviceRecord,
    pub updated_at: DateTime<Utc>,
}
