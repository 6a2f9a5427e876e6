//! In-memory collaborators for `--dry-run`.
//!
//! Services, routing and interface addresses are simulated; device
//! records still come from the real host file (read-only) so enable
//! decisions reflect the gateway's actual devices.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tungate_core::system::hosts::HostFileDirectory;
use tungate_core::system::memory::{Journal, MemorySystem};
use tungate_core::{GatewayConfig, ProfileId, SystemHandles};

use crate::cli::GlobalOpts;

/// Client-side address every simulated tunnel reports.
const SIMULATED_LOCAL: Ipv4Addr = Ipv4Addr::new(10, 255, 0, 6);
/// Remote gateway every simulated tunnel reports.
const SIMULATED_REMOTE: Ipv4Addr = Ipv4Addr::new(10, 255, 0, 5);

/// Build dry-run handles. Every profile in `profiles` gets an interface
/// that reports [`SIMULATED_REMOTE`] as soon as it is polled.
pub fn system(config: &GatewayConfig, profiles: &[ProfileId]) -> (SystemHandles, Journal) {
    let memory = MemorySystem::new(config.overlay_subnet);
    for id in profiles {
        memory
            .probe
            .set_point_to_point(&id.interface_name(), SIMULATED_LOCAL, SIMULATED_REMOTE);
    }
    let spoofing = config
        .spoof_marker
        .as_deref()
        .is_some_and(std::path::Path::exists);
    memory.probe.set_spoof_active(spoofing);

    let handles = SystemHandles {
        directory: Arc::new(HostFileDirectory::new(config.hosts_file.clone())),
        ..memory.handles()
    };
    (handles, memory.journal)
}

/// Print the host operations a real run would have performed.
pub fn report(journal: &Journal, global: &GlobalOpts) {
    if global.quiet {
        return;
    }
    for entry in journal.entries() {
        eprintln!("dry-run: {entry}");
    }
}
