// ── Device access controller ──
//
// Decides which LAN devices are policy-routed into a tunnel table. A
// device is routed while it is enabled, has an address, is eligible
// (inside the overlay subnet, or DHCP spoofing is active) and is under
// monitoring. The enabled set is kept in memory; a periodic pass
// re-reads every device and repairs its rule.

mod reconcile;

use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AccessTimings;
use crate::error::{CoreError, tolerate};
use crate::locks::KeyedLocks;
use crate::model::{
    AccessMode, AccessOutcome, DeviceRecord, EnabledDevice, MacAddress, PolicyRule, table_name,
};
use crate::routes::RouteEnforcer;
use crate::system::SystemHandles;

/// Counters from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Devices looked at.
    pub checked: usize,
    /// Devices skipped because their record could not be read.
    pub skipped: usize,
    pub rules_installed: usize,
    pub rules_removed: usize,
}

/// Owner of the enabled-device set and its policy rules.
pub struct AccessController {
    system: SystemHandles,
    enforcer: Arc<RouteEnforcer>,
    timings: AccessTimings,
    enabled: DashMap<MacAddress, EnabledDevice>,
    locks: KeyedLocks,
}

impl AccessController {
    pub fn new(system: SystemHandles, enforcer: Arc<RouteEnforcer>, timings: AccessTimings) -> Self {
        Self {
            system,
            enforcer,
            timings,
            enabled: DashMap::new(),
            locks: KeyedLocks::new(),
        }
    }

    // ── Enable / disable ─────────────────────────────────────────

    /// Grant `mac` access to the tunnel on `interface`.
    ///
    /// An unsupported mode changes nothing. Otherwise the device is
    /// recorded whatever its eligibility, and a rule is installed only if
    /// it is eligible and monitored. Directory lookups and eligibility
    /// queries propagate their errors.
    pub async fn enable(
        &self,
        mac: &MacAddress,
        mode: AccessMode,
        interface: &str,
    ) -> Result<AccessOutcome, CoreError> {
        if let AccessMode::Unsupported(ref requested) = mode {
            error!(mac = %mac, mode = %requested, "unsupported access mode, device not enabled");
            return Ok(AccessOutcome::UnsupportedMode);
        }

        let _guard = self.locks.lock(mac.as_str()).await;
        let table = self.enforcer.ensure_table(interface).await?;
        let record = self.system.directory.fetch(mac).await?;
        let eligible = self.is_eligible(record.ip).await?;

        // A re-enable may move the device to another address or tunnel.
        if let Some(previous) = self.enabled.get(mac).map(|e| e.value().clone()) {
            let previous_table = table_name(&previous.interface);
            match previous.snapshot.ip {
                Some(old_ip) if Some(old_ip) != record.ip || previous_table != table => {
                    self.remove_rule(old_ip, &previous_table).await;
                }
                _ => {}
            }
        }

        let outcome = match (eligible, record.ip) {
            (true, Some(ip)) if record.monitored => {
                tolerate(
                    self.system
                        .routing
                        .remove_rule(&PolicyRule::any_table(ip))
                        .await,
                    "generic rule",
                );
                self.system
                    .routing
                    .add_rule(&PolicyRule::new(ip, table.clone()))
                    .await?;
                AccessOutcome::RuleInstalled
            }
            (true, Some(_)) => AccessOutcome::NotMonitored,
            _ => AccessOutcome::Suspended,
        };

        self.enabled.insert(
            mac.clone(),
            EnabledDevice {
                mac: mac.clone(),
                mode,
                interface: interface.to_owned(),
                snapshot: record,
                updated_at: Utc::now(),
            },
        );
        info!(mac = %mac, table = %table, outcome = %outcome, "device enabled");
        Ok(outcome)
    }

    /// Revoke access for `mac`. Unknown devices are ignored.
    ///
    /// Returns whether the device was enabled.
    pub async fn disable(&self, mac: &MacAddress) -> bool {
        let _guard = self.locks.lock(mac.as_str()).await;
        let Some(device) = self.enabled.get(mac).map(|e| e.value().clone()) else {
            debug!(mac = %mac, "disable requested for device that is not enabled");
            return false;
        };
        if let Some(ip) = device.snapshot.ip {
            self.remove_rule(ip, &table_name(&device.interface)).await;
        }
        self.enabled.remove(mac);
        info!(mac = %mac, "device disabled");
        true
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Snapshot of the enabled set, sorted by MAC.
    pub fn enabled_devices(&self) -> Vec<EnabledDevice> {
        let mut devices: Vec<EnabledDevice> =
            self.enabled.iter().map(|e| e.value().clone()).collect();
        devices.sort_by(|a, b| a.mac.cmp(&b.mac));
        devices
    }

    pub fn is_enabled(&self, mac: &MacAddress) -> bool {
        self.enabled.contains_key(mac)
    }

    async fn is_eligible(&self, ip: Option<Ipv4Addr>) -> Result<bool, CoreError> {
        let Some(ip) = ip else {
            return Ok(false);
        };
        if self.system.probe.in_overlay_subnet(ip).await? {
            return Ok(true);
        }
        self.system.probe.dhcp_spoof_active().await
    }

    async fn remove_rule(&self, ip: Ipv4Addr, table: &str) {
        tolerate(
            self.system
                .routing
                .remove_rule(&PolicyRule::new(ip, table))
                .await,
            "device rule",
        );
    }

    // ── Reconciliation ───────────────────────────────────────────

    /// Bring every enabled device's rule in line with its live record.
    ///
    /// A device whose record cannot be read keeps its rule and snapshot
    /// until a later pass succeeds.
    pub async fn reconcile_once(&self) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let macs: Vec<MacAddress> = self.enabled.iter().map(|e| e.key().clone()).collect();

        for mac in macs {
            let _guard = self.locks.lock(mac.as_str()).await;
            // Disabled while this pass was waiting on the lock.
            let Some(device) = self.enabled.get(&mac).map(|e| e.value().clone()) else {
                continue;
            };
            summary.checked += 1;

            let live = match self.system.directory.fetch(&mac).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(mac = %mac, error = %e, "device lookup failed, skipping this pass");
                    summary.skipped += 1;
                    continue;
                }
            };
            let eligible = match self.is_eligible(live.ip).await {
                Ok(eligible) => eligible,
                Err(e) => {
                    warn!(mac = %mac, error = %e, "eligibility check failed, skipping this pass");
                    summary.skipped += 1;
                    continue;
                }
            };

            let table = table_name(&device.interface);
            let route = eligible && live.monitored;
            let stale = device
                .snapshot
                .ip
                .filter(|old_ip| Some(*old_ip) != live.ip || !route);
            if let Some(old_ip) = stale {
                let rule = PolicyRule::new(old_ip, table.clone());
                match self.system.routing.remove_rule(&rule).await {
                    Ok(()) => summary.rules_removed += 1,
                    Err(e) if e.is_not_present() => debug!(rule = %rule, "already absent"),
                    Err(e) => warn!(rule = %rule, error = %e, "failed to remove stale rule"),
                }
            }
            if let Some(ip) = live.ip.filter(|_| route) {
                if let Err(e) = self
                    .system
                    .routing
                    .add_rule(&PolicyRule::new(ip, table))
                    .await
                {
                    warn!(mac = %mac, error = %e, "failed to install device rule");
                } else {
                    summary.rules_installed += 1;
                }
            }

            self.update_snapshot(&mac, live);
        }

        debug!(
            checked = summary.checked,
            skipped = summary.skipped,
            installed = summary.rules_installed,
            removed = summary.rules_removed,
            "access reconciliation pass complete"
        );
        summary
    }

    fn update_snapshot(&self, mac: &MacAddress, live: DeviceRecord) {
        if let Some(mut entry) = self.enabled.get_mut(mac) {
            entry.snapshot = live;
            entry.updated_at = Utc::now();
        }
    }

    /// Run [`reconcile_once`](Self::reconcile_once) every reconcile
    /// interval until `cancel` fires.
    pub fn spawn_reconciler(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(reconcile::reconcile_task(
            Arc::clone(self),
            self.timings.reconcile_interval,
            cancel,
        ))
    }
}

impl std::fmt::Debug for AccessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessController")
            .field("enabled", &self.enabled.len())
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}
