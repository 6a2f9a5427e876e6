// ── Tunnel domain types ──

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use super::ids::{ProfileId, table_name};

/// Lifecycle state of one tunnel controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TunnelState {
    Init,
    /// Service started, waiting for the interface to report a remote.
    Starting,
    /// Remote observed, routes enforced, refresh loop running.
    Established,
    Stopped,
    /// Last start attempt timed out or errored. A new start is allowed.
    Failed,
}

/// Identity and file locations of one tunnel, plus the endpoint that was
/// last enforced into its routing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelProfile {
    pub id: ProfileId,
    pub interface: String,
    pub config_path: PathBuf,
    pub credential_path: PathBuf,
    pub remote_gateway: Option<Ipv4Addr>,
}

impl TunnelProfile {
    /// Build the profile for `id` with files under `profile_dir`.
    pub fn new(id: ProfileId, profile_dir: &Path) -> Self {
        let interface = id.interface_name();
        let config_path = profile_dir.join(format!("{id}.ovpn"));
        let credential_path = profile_dir.join(format!("{id}.password"));
        Self {
            id,
            interface,
            config_path,
            credential_path,
            remote_gateway: None,
        }
    }

    pub fn table_name(&self) -> String {
        table_name(&self.interface)
    }
}
