// ── External collaborators ──
//
// Everything the core observes or mutates in the OS goes through these
// traits. `linux` drives the real tools (`ip`, `systemctl`), `hosts`
// reads device records from a JSON file, and `memory` keeps all state
// in-process for dry runs and tests.

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::GatewayConfig;
use crate::error::CoreError;
use crate::model::{DeviceRecord, MacAddress, PointToPoint, PolicyRule, RouteEntry};

pub mod hosts;
pub mod linux;
pub mod memory;
pub(crate) mod parse;

/// Process supervisor (systemd on Linux) addressed by unit name.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn start(&self, unit: &str) -> Result<(), CoreError>;
    async fn stop(&self, unit: &str) -> Result<(), CoreError>;
    async fn enable(&self, unit: &str) -> Result<(), CoreError>;
    async fn disable(&self, unit: &str) -> Result<(), CoreError>;
    async fn is_active(&self, unit: &str) -> Result<bool, CoreError>;
}

/// Atomic routing-table and policy-rule operations.
///
/// `create_table` and `add_rule` are idempotent. Removals report an absent
/// target as [`CoreError::NotPresent`].
#[async_trait]
pub trait RoutingPrimitives: Send + Sync {
    async fn create_table(&self, table: &str) -> Result<(), CoreError>;
    async fn flush_table(&self, table: &str) -> Result<(), CoreError>;
    /// Add a route; `None` targets the main table.
    async fn add_route(&self, route: &RouteEntry, table: Option<&str>) -> Result<(), CoreError>;
    async fn remove_route(&self, route: &RouteEntry, table: Option<&str>)
    -> Result<(), CoreError>;
    async fn add_rule(&self, rule: &PolicyRule) -> Result<(), CoreError>;
    async fn remove_rule(&self, rule: &PolicyRule) -> Result<(), CoreError>;
    /// Current contents of the main table.
    async fn main_routes(&self) -> Result<Vec<RouteEntry>, CoreError>;
}

/// Device identity storage.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn fetch(&self, mac: &MacAddress) -> Result<DeviceRecord, CoreError>;
}

/// Read-only view of interface and subnet state.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// Local/peer pairs on `interface`, in the order the kernel lists them.
    /// A missing interface yields an empty list.
    async fn point_to_point_addrs(&self, interface: &str) -> Result<Vec<PointToPoint>, CoreError>;
    async fn in_overlay_subnet(&self, ip: Ipv4Addr) -> Result<bool, CoreError>;
    async fn dhcp_spoof_active(&self) -> Result<bool, CoreError>;
}

/// Shared handles to every collaborator, cheap to clone.
#[derive(Clone)]
pub struct SystemHandles {
    pub services: Arc<dyn ServiceManager>,
    pub routing: Arc<dyn RoutingPrimitives>,
    pub directory: Arc<dyn DeviceDirectory>,
    pub probe: Arc<dyn NetworkProbe>,
}

impl SystemHandles {
    /// Handles backed by `systemctl`, `ip` and the JSON host file named in
    /// `config`.
    pub fn linux(config: &GatewayConfig) -> Self {
        Self {
            services: Arc::new(linux::SystemdServices),
            routing: Arc::new(linux::IpRouting::new(config.rt_tables.clone())),
            directory: Arc::new(hosts::HostFileDirectory::new(config.hosts_file.clone())),
            probe: Arc::new(linux::LinuxProbe::new(
                config.overlay_subnet,
                config.spoof_marker.clone(),
            )),
        }
    }
}

impl std::fmt::Debug for SystemHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemHandles").finish_non_exhaustive()
    }
}
