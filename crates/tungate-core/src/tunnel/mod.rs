// ── Tunnel lifecycle controller ──
//
// Owns one tunnel profile: prepares its files, starts and stops the
// client service, polls the interface until a remote gateway shows up,
// installs the per-tunnel table, and keeps it current while the tunnel
// renegotiates.

mod refresh;
mod setup;

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TunnelTimings;
use crate::error::{CoreError, tolerate};
use crate::model::{Ipv4Net, ProfileId, RouteEntry, TunnelProfile, TunnelState, select_remote};
use crate::routes::RouteEnforcer;
use crate::system::SystemHandles;

/// Halves of the address space a full-tunnel client installs into the
/// main table in place of replacing the default route.
const SPLIT_DEFAULTS: [&str; 2] = ["0.0.0.0/1", "128.0.0.0/1"];

// ── TunnelController ─────────────────────────────────────────────

/// Lifecycle controller for one tunnel profile.
///
/// Cheaply cloneable; clones share the same tunnel. Obtain instances from
/// [`TunnelRegistry`](crate::TunnelRegistry) so there is one per profile.
#[derive(Clone)]
pub struct TunnelController {
    inner: Arc<TunnelInner>,
}

struct TunnelInner {
    profile: Mutex<TunnelProfile>,
    service_unit: String,
    timings: TunnelTimings,
    system: SystemHandles,
    enforcer: Arc<RouteEnforcer>,
    state: watch::Sender<TunnelState>,
    refresh: Mutex<Option<RefreshHandle>>,
}

struct RefreshHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TunnelController {
    pub(crate) fn new(
        profile: TunnelProfile,
        service_unit: String,
        timings: TunnelTimings,
        system: SystemHandles,
        enforcer: Arc<RouteEnforcer>,
    ) -> Self {
        let (state, _) = watch::channel(TunnelState::Init);
        Self {
            inner: Arc::new(TunnelInner {
                profile: Mutex::new(profile),
                service_unit,
                timings,
                system,
                enforcer,
                state,
                refresh: Mutex::new(None),
            }),
        }
    }

    /// True when both handles control the same tunnel.
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn service_unit(&self) -> &str {
        &self.inner.service_unit
    }

    /// Snapshot of the profile, including the last enforced remote.
    pub async fn profile(&self) -> TunnelProfile {
        self.inner.profile.lock().await.clone()
    }

    pub async fn id(&self) -> ProfileId {
        self.inner.profile.lock().await.id.clone()
    }

    pub fn state(&self) -> TunnelState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TunnelState> {
        self.inner.state.subscribe()
    }

    fn set_state(&self, state: TunnelState) {
        // `send_replace` updates even with zero receivers.
        self.inner.state.send_replace(state);
    }

    // ── Setup ────────────────────────────────────────────────────

    /// Check the profile config exists, patch deprecated directives, and
    /// create the credential placeholder.
    pub async fn setup(&self) -> Result<(), CoreError> {
        let (config_path, credential_path) = {
            let profile = self.inner.profile.lock().await;
            (profile.config_path.clone(), profile.credential_path.clone())
        };
        setup::prepare_profile(&config_path, &credential_path).await
    }

    // ── Start ────────────────────────────────────────────────────

    /// Start the tunnel and wait for it to come up.
    ///
    /// Returns `Ok(true)` once the interface reports a remote gateway and
    /// the per-tunnel table is in place, `Ok(false)` if the service could
    /// not be started, the deadline passed, or a poll failed. Only a
    /// missing profile config is an error.
    pub async fn start(&self) -> Result<bool, CoreError> {
        let (id, config_path, interface) = {
            let profile = self.inner.profile.lock().await;
            (
                profile.id.clone(),
                profile.config_path.clone(),
                profile.interface.clone(),
            )
        };
        if !tokio::fs::try_exists(&config_path).await? {
            return Err(CoreError::Config {
                message: format!("profile config {} does not exist", config_path.display()),
            });
        }

        self.set_state(TunnelState::Starting);
        if let Err(e) = self.inner.system.services.start(&self.inner.service_unit).await {
            warn!(profile = %id, error = %e, "failed to start tunnel service");
            self.set_state(TunnelState::Failed);
            return Ok(false);
        }
        info!(profile = %id, unit = %self.inner.service_unit, "tunnel service started");

        let remote = match self.await_establishment(&interface).await {
            Ok(Some(remote)) => remote,
            Ok(None) => {
                warn!(
                    profile = %id,
                    timeout = ?self.inner.timings.establish_timeout,
                    "tunnel did not come up before the deadline"
                );
                self.set_state(TunnelState::Failed);
                return Ok(false);
            }
            Err(e) => {
                warn!(profile = %id, error = %e, "tunnel establishment failed");
                self.set_state(TunnelState::Failed);
                return Ok(false);
            }
        };

        if let Err(e) = self.on_established(remote, &interface).await {
            warn!(profile = %id, error = %e, "failed to install tunnel routes");
            self.set_state(TunnelState::Failed);
            return Ok(false);
        }

        self.set_state(TunnelState::Established);
        self.spawn_refresh().await;
        info!(profile = %id, remote = %remote, interface = %interface, "tunnel established");
        Ok(true)
    }

    /// Poll `interface` until it reports a remote gateway or the deadline
    /// passes. The first poll happens one interval after the call.
    async fn await_establishment(&self, interface: &str) -> Result<Option<Ipv4Addr>, CoreError> {
        let timings = self.inner.timings;
        let deadline = Instant::now() + timings.establish_timeout;
        let mut interval = tokio::time::interval(timings.poll_interval);
        interval.tick().await; // consume the immediate first tick

        loop {
            interval.tick().await;
            let pairs = self
                .inner
                .system
                .probe
                .point_to_point_addrs(interface)
                .await?;
            if let Some(remote) = select_remote(&pairs) {
                return Ok(Some(remote));
            }
            debug!(interface, "tunnel not up yet");
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    /// Clear the client's split default routes, then build the table.
    async fn on_established(&self, remote: Ipv4Addr, interface: &str) -> Result<(), CoreError> {
        for split in SPLIT_DEFAULTS {
            let net: Ipv4Net = split.parse()?;
            let route = RouteEntry::prefix_via(net, remote, interface);
            tolerate(
                self.inner.system.routing.remove_route(&route, None).await,
                split,
            );
        }

        self.inner.enforcer.enforce_routes(remote, interface).await?;

        let mut profile = self.inner.profile.lock().await;
        profile.remote_gateway = Some(remote);
        profile.interface = interface.to_owned();
        Ok(())
    }

    // ── Refresh ──────────────────────────────────────────────────

    /// Re-read the remote endpoint and re-enforce routes if it or the
    /// interface changed since the last enforcement.
    ///
    /// Returns whether routes were re-enforced.
    pub async fn refresh_routes(&self) -> Result<bool, CoreError> {
        let (interface, last_remote, last_interface) = {
            let profile = self.inner.profile.lock().await;
            (
                profile.id.interface_name(),
                profile.remote_gateway,
                profile.interface.clone(),
            )
        };

        let pairs = self
            .inner
            .system
            .probe
            .point_to_point_addrs(&interface)
            .await?;
        let Some(remote) = select_remote(&pairs) else {
            debug!(interface = %interface, "no remote reported, keeping current routes");
            return Ok(false);
        };
        if last_remote == Some(remote) && last_interface == interface {
            return Ok(false);
        }

        info!(
            interface = %interface,
            previous = ?last_remote,
            remote = %remote,
            "tunnel endpoint changed, re-enforcing routes"
        );
        self.inner.enforcer.enforce_routes(remote, &interface).await?;

        let mut profile = self.inner.profile.lock().await;
        profile.remote_gateway = Some(remote);
        profile.interface = interface;
        Ok(true)
    }

    async fn spawn_refresh(&self) {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(refresh::route_refresh_task(
            self.clone(),
            self.inner.timings.route_refresh_interval,
            cancel.clone(),
        ));
        let previous = self
            .inner
            .refresh
            .lock()
            .await
            .replace(RefreshHandle { cancel, task });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    async fn cancel_refresh(&self) {
        let handle = self.inner.refresh.lock().await.take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                warn!(error = %e, "route refresh task ended abnormally");
            }
        }
    }

    /// True while the route refresh loop is running.
    pub async fn refresh_active(&self) -> bool {
        self.inner
            .refresh
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    // ── Stop / status ────────────────────────────────────────────

    /// Stop the tunnel.
    ///
    /// The refresh loop is halted first so it cannot repopulate the table,
    /// then the table is flushed while the interface still exists, then
    /// the service is stopped and disabled. Each step runs even if an
    /// earlier one failed.
    pub async fn stop(&self) {
        let (id, interface) = {
            let profile = self.inner.profile.lock().await;
            (profile.id.clone(), profile.interface.clone())
        };

        self.cancel_refresh().await;

        if let Err(e) = self.inner.enforcer.flush_routes(&interface).await {
            warn!(profile = %id, error = %e, "failed to flush tunnel routes");
        }
        let services = &self.inner.system.services;
        if let Err(e) = services.stop(&self.inner.service_unit).await {
            warn!(profile = %id, error = %e, "failed to stop tunnel service");
        }
        if let Err(e) = services.disable(&self.inner.service_unit).await {
            warn!(profile = %id, error = %e, "failed to disable tunnel service");
        }

        self.inner.profile.lock().await.remote_gateway = None;
        self.set_state(TunnelState::Stopped);
        info!(profile = %id, "tunnel stopped");
    }

    /// Have the service manager bring this tunnel up at boot. `stop`
    /// reverts it.
    pub async fn enable_service(&self) -> Result<(), CoreError> {
        self.inner
            .system
            .services
            .enable(&self.inner.service_unit)
            .await
    }

    /// Whether the tunnel service is running. Query failures read as
    /// inactive.
    pub async fn status(&self) -> bool {
        match self
            .inner
            .system
            .services
            .is_active(&self.inner.service_unit)
            .await
        {
            Ok(active) => active,
            Err(e) => {
                debug!(unit = %self.inner.service_unit, error = %e, "status query failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for TunnelController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelController")
            .field("service_unit", &self.inner.service_unit)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
