//! Tunnel lifecycle and per-device policy routing for VPN client gateways.
//!
//! - **[`TunnelController`]**: brings a tunnel profile up through the
//!   service manager, polls its interface until a remote gateway appears,
//!   builds the per-tunnel routing table, and refreshes it when the
//!   remote rotates. Obtain controllers from a [`TunnelRegistry`].
//!
//! - **[`RouteEnforcer`]**: rebuilds `<interface>_table` as the main table
//!   minus its default route plus one default via the tunnel.
//!
//! - **[`AccessController`]**: keeps the set of enabled devices and their
//!   source rules, with a periodic reconciliation pass.
//!
//! - **[`Gateway`]**: wires the above to one set of [`SystemHandles`].
//!
//! All host interaction goes through the traits in [`system`], with a
//! Linux implementation (`ip`, `systemctl`) and an in-memory one for dry
//! runs and tests.

pub mod access;
pub mod config;
pub mod error;
pub mod gateway;
mod locks;
pub mod model;
pub mod registry;
pub mod routes;
pub mod system;
pub mod tunnel;

// ── Primary re-exports ──────────────────────────────────────────────
pub use access::{AccessController, ReconcileSummary};
pub use config::{AccessTimings, GatewayConfig, TunnelTimings};
pub use error::CoreError;
pub use gateway::Gateway;
pub use registry::TunnelRegistry;
pub use routes::RouteEnforcer;
pub use system::SystemHandles;
pub use tunnel::TunnelController;

pub use model::{
    AccessMode, AccessOutcome, Destination, DeviceRecord, EnabledDevice, Ipv4Net, MacAddress,
    PointToPoint, PolicyRule, ProfileId, RouteEntry, TunnelProfile, TunnelState, select_remote,
    table_name,
};
