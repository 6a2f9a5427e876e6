// ── Domain model ──

pub mod device;
pub mod ids;
pub mod net;
pub mod tunnel;

pub use device::{AccessMode, AccessOutcome, DeviceRecord, EnabledDevice};
pub use ids::{MacAddress, ProfileId, table_name};
pub use net::{Destination, Ipv4Net, PointToPoint, PolicyRule, RouteEntry, select_remote};
pub use tunnel::{TunnelProfile, TunnelState};
