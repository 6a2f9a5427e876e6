// ── Gateway facade ──
//
// Wires one set of system collaborators into the tunnel registry and the
// access controller. Both share a single route enforcer so table work on
// an interface is serialized across them.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::access::AccessController;
use crate::config::GatewayConfig;
use crate::error::CoreError;
use crate::model::{AccessMode, AccessOutcome, MacAddress, ProfileId};
use crate::registry::TunnelRegistry;
use crate::routes::RouteEnforcer;
use crate::system::SystemHandles;
use crate::tunnel::TunnelController;

/// Top-level handle for managing tunnels and device access on one host.
pub struct Gateway {
    config: GatewayConfig,
    system: SystemHandles,
    tunnels: TunnelRegistry,
    access: Arc<AccessController>,
    cancel: CancellationToken,
    reconciler: Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, system: SystemHandles) -> Self {
        let enforcer = Arc::new(RouteEnforcer::new(Arc::clone(&system.routing)));
        let tunnels = TunnelRegistry::new(
            config.profile_dir.clone(),
            config.service_unit.clone(),
            config.tunnel,
            system.clone(),
            Arc::clone(&enforcer),
        );
        let access = Arc::new(AccessController::new(
            system.clone(),
            enforcer,
            config.access,
        ));
        Self {
            config,
            system,
            tunnels,
            access,
            cancel: CancellationToken::new(),
            reconciler: Mutex::new(None),
        }
    }

    /// Gateway driving the real host tools.
    pub fn linux(config: GatewayConfig) -> Self {
        let system = SystemHandles::linux(&config);
        Self::new(config, system)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn system(&self) -> &SystemHandles {
        &self.system
    }

    pub fn tunnels(&self) -> &TunnelRegistry {
        &self.tunnels
    }

    /// Controller for `profile`, created on first use.
    pub fn tunnel(&self, profile: &ProfileId) -> TunnelController {
        self.tunnels.get_or_create(profile)
    }

    pub fn access(&self) -> &Arc<AccessController> {
        &self.access
    }

    /// Enable `mac` on the tunnel belonging to `profile`.
    pub async fn enable_device(
        &self,
        mac: &MacAddress,
        mode: AccessMode,
        profile: &ProfileId,
    ) -> Result<AccessOutcome, CoreError> {
        self.access
            .enable(mac, mode, &profile.interface_name())
            .await
    }

    /// Start the access reconciliation loop. A second call is a no-op
    /// while the first loop is running.
    pub async fn start_reconciler(&self) {
        let mut slot = self.reconciler.lock().await;
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        *slot = Some(self.access.spawn_reconciler(self.cancel.child_token()));
        info!(
            interval = ?self.config.access.reconcile_interval,
            "access reconciler started"
        );
    }

    /// Stop background loops owned by the gateway. Tunnels are left as
    /// they are; stopping them is the caller's decision.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.reconciler.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "access reconciler ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("tunnels", &self.tunnels)
            .field("access", &self.access)
            .finish_non_exhaustive()
    }
}
