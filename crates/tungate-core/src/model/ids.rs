// ── Core identity types ──
//
// ProfileId keys tunnels, MacAddress keys devices. Every derived name
// (interface, routing table, service unit) is a pure function of these.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix of every tunnel interface created for a profile.
const INTERFACE_PREFIX: &str = "tun_";

/// Suffix of the per-tunnel routing table name.
const TABLE_SUFFIX: &str = "_table";

// ── ProfileId ───────────────────────────────────────────────────────

/// Identifier of a tunnel profile (one VPN client configuration).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(String);

impl ProfileId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tunnel interface name for this profile: `"abc"` becomes `"tun_abc"`.
    pub fn interface_name(&self) -> String {
        format!("{INTERFACE_PREFIX}{}", self.0)
    }

    /// Service unit name, substituting `{profile}` in `template`.
    pub fn service_unit(&self, template: &str) -> String {
        template.replace("{profile}", &self.0)
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProfileId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ProfileId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Name of the per-tunnel routing table bound to `interface`.
///
/// The table belongs to the interface name, not to a controller instance,
/// so a restarted tunnel reuses the same table.
pub fn table_name(interface: &str) -> String {
    format!("{interface}{TABLE_SUFFIX}")
}

// ── MacAddress ──────────────────────────────────────────────────────

/// MAC address, normalized to lowercase colon-separated format (aa:bb:cc:dd:ee:ff).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// Create a normalized MAC address from any common format.
    /// Accepts colon-separated or dash-separated, any case.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let normalized = raw.as_ref().trim().to_lowercase().replace('-', ":");
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<String> for MacAddress {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}
