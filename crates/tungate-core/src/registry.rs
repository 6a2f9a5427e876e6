// ── Tunnel registry ──
//
// One controller per profile id for the lifetime of the registry. The
// registry is owned by whoever manages tunnels (the gateway facade, a
// test); there is no process-wide instance.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::config::TunnelTimings;
use crate::model::{ProfileId, TunnelProfile};
use crate::routes::RouteEnforcer;
use crate::system::SystemHandles;
use crate::tunnel::TunnelController;

/// Keyed set of tunnel controllers sharing one system and route enforcer.
pub struct TunnelRegistry {
    controllers: DashMap<ProfileId, TunnelController>,
    profile_dir: PathBuf,
    service_template: String,
    timings: TunnelTimings,
    system: SystemHandles,
    enforcer: Arc<RouteEnforcer>,
}

impl TunnelRegistry {
    pub fn new(
        profile_dir: PathBuf,
        service_template: impl Into<String>,
        timings: TunnelTimings,
        system: SystemHandles,
        enforcer: Arc<RouteEnforcer>,
    ) -> Self {
        Self {
            controllers: DashMap::new(),
            profile_dir,
            service_template: service_template.into(),
            timings,
            system,
            enforcer,
        }
    }

    /// The controller for `id`, created on first request. Every later call
    /// with the same id returns a handle to the same controller.
    pub fn get_or_create(&self, id: &ProfileId) -> TunnelController {
        self.controllers
            .entry(id.clone())
            .or_insert_with(|| {
                debug!(profile = %id, "creating tunnel controller");
                TunnelController::new(
                    TunnelProfile::new(id.clone(), &self.profile_dir),
                    id.service_unit(&self.service_template),
                    self.timings,
                    self.system.clone(),
                    Arc::clone(&self.enforcer),
                )
            })
            .value()
            .clone()
    }

    pub fn get(&self, id: &ProfileId) -> Option<TunnelController> {
        self.controllers.get(id).map(|c| c.value().clone())
    }

    /// Ids of every controller created so far, sorted.
    pub fn profiles(&self) -> Vec<ProfileId> {
        let mut ids: Vec<ProfileId> = self.controllers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

impl std::fmt::Debug for TunnelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelRegistry")
            .field("profiles", &self.profiles())
            .field("profile_dir", &self.profile_dir)
            .finish_non_exhaustive()
    }
}
