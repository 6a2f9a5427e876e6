// ── Runtime gateway configuration ──
//
// These types describe *how* the gateway manages tunnels and device
// access. They never touch disk: tungate-config (or a test) builds a
// `GatewayConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use crate::model::Ipv4Net;

/// Timing of the tunnel establishment and refresh loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelTimings {
    /// How often the interface is polled while a start is in progress.
    pub poll_interval: Duration,
    /// Deadline for the interface to report a remote gateway.
    pub establish_timeout: Duration,
    /// How often an established tunnel re-checks its remote endpoint.
    pub route_refresh_interval: Duration,
}

impl Default for TunnelTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            establish_timeout: Duration::from_secs(20),
            route_refresh_interval: Duration::from_secs(300),
        }
    }
}

/// Timing of the device access reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessTimings {
    pub reconcile_interval: Duration,
}

impl Default for AccessTimings {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(300),
        }
    }
}

/// Configuration for the whole gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Directory holding `<profile>.ovpn` and `<profile>.password`.
    pub profile_dir: PathBuf,
    /// Service unit template; `{profile}` is replaced by the profile id.
    pub service_unit: String,
    /// iproute2 table registry file.
    pub rt_tables: PathBuf,
    /// JSON host records consumed by the file-backed device directory.
    pub hosts_file: PathBuf,
    /// Secondary/overlay subnet whose members are always eligible.
    pub overlay_subnet: Option<Ipv4Net>,
    /// DHCP spoof mode is active while this file exists.
    pub spoof_marker: Option<PathBuf>,
    pub tunnel: TunnelTimings,
    pub access: AccessTimings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            profile_dir: PathBuf::from("/etc/openvpn/client"),
            service_unit: "openvpn-client@{profile}".into(),
            rt_tables: PathBuf::from("/etc/iproute2/rt_tables"),
            hosts_file: PathBuf::from("/var/lib/tungate/hosts.json"),
            overlay_subnet: None,
            spoof_marker: None,
            tunnel: TunnelTimings::default(),
            access: AccessTimings::default(),
        }
    }
}
