// ── In-memory collaborators ──
//
// Full stand-ins for the OS: routing tables, policy rules, service
// units, host records and interface addresses all live in process.
// Used by `--dry-run` and by tests. Every mutation is appended to a
// shared journal so callers can assert on ordering, and any operation
// can be made to fail on demand.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use super::{DeviceDirectory, NetworkProbe, RoutingPrimitives, ServiceManager, SystemHandles};
use crate::error::CoreError;
use crate::model::{DeviceRecord, Ipv4Net, MacAddress, PointToPoint, PolicyRule, RouteEntry};

const MAIN_TABLE: &str = "main";

// ── Journal ─────────────────────────────────────────────────────────

/// Ordered log of mutations, shared by every in-memory collaborator.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: String) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Position of the first entry starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }

    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Operation names that should fail, shared by one collaborator.
#[derive(Debug, Default)]
struct Faults(DashSet<&'static str>);

impl Faults {
    fn check(&self, operation: &'static str) -> Result<(), CoreError> {
        if self.0.contains(operation) {
            return Err(CoreError::CommandFailed {
                program: "memory".into(),
                args: operation.into(),
                status: "injected".into(),
                stderr: format!("{operation} failed"),
            });
        }
        Ok(())
    }
}

// ── Routing ─────────────────────────────────────────────────────────

/// In-memory [`RoutingPrimitives`].
#[derive(Debug, Default)]
pub struct MemoryRouting {
    tables: DashMap<String, Vec<RouteEntry>>,
    rules: DashSet<PolicyRule>,
    journal: Journal,
    faults: Faults,
}

impl MemoryRouting {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    /// Replace the main table contents.
    pub fn set_main_routes(&self, routes: Vec<RouteEntry>) {
        self.tables.insert(MAIN_TABLE.to_owned(), routes);
    }

    /// Routes of `table`, or `None` when it was never created.
    pub fn table(&self, table: &str) -> Option<Vec<RouteEntry>> {
        self.tables.get(table).map(|r| r.value().clone())
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn rules(&self) -> Vec<PolicyRule> {
        self.rules.iter().map(|r| r.key().clone()).collect()
    }

    pub fn has_rule(&self, rule: &PolicyRule) -> bool {
        self.rules.contains(rule)
    }

    /// Make every later call of `operation` fail (e.g. `"flush_table"`).
    pub fn fail_on(&self, operation: &'static str) {
        self.faults.0.insert(operation);
    }

    pub fn clear_faults(&self) {
        self.faults.0.clear();
    }
}

#[async_trait]
impl RoutingPrimitives for MemoryRouting {
    async fn create_table(&self, table: &str) -> Result<(), CoreError> {
        self.faults.check("create_table")?;
        if !self.tables.contains_key(table) {
            self.tables.insert(table.to_owned(), Vec::new());
            self.journal.push(format!("table create {table}"));
        }
        Ok(())
    }

    async fn flush_table(&self, table: &str) -> Result<(), CoreError> {
        self.faults.check("flush_table")?;
        match self.tables.get_mut(table) {
            Some(mut routes) => routes.clear(),
            None => {
                return Err(CoreError::CommandFailed {
                    program: "memory".into(),
                    args: format!("flush {table}"),
                    status: "failed".into(),
                    stderr: format!("table {table} does not exist"),
                });
            }
        }
        self.journal.push(format!("table flush {table}"));
        Ok(())
    }

    async fn add_route(&self, route: &RouteEntry, table: Option<&str>) -> Result<(), CoreError> {
        self.faults.check("add_route")?;
        let table = table.unwrap_or(MAIN_TABLE);
        let mut routes = self.tables.entry(table.to_owned()).or_default();
        // Same key (destination + metric) replaces, like `ip route replace`.
        routes.retain(|r| !(r.destination == route.destination && r.metric == route.metric));
        routes.push(route.clone());
        drop(routes);
        self.journal.push(format!("route add {route} table {table}"));
        Ok(())
    }

    async fn remove_route(
        &self,
        route: &RouteEntry,
        table: Option<&str>,
    ) -> Result<(), CoreError> {
        self.faults.check("remove_route")?;
        let table = table.unwrap_or(MAIN_TABLE);
        let removed = self.tables.get_mut(table).is_some_and(|mut routes| {
            let before = routes.len();
            routes.retain(|r| {
                !(r.destination == route.destination
                    && (route.gateway.is_none() || r.gateway == route.gateway)
                    && (route.device.is_none() || r.device == route.device))
            });
            routes.len() != before
        });
        if !removed {
            return Err(CoreError::NotPresent {
                what: format!("route {route} in {table}"),
            });
        }
        self.journal.push(format!("route del {route} table {table}"));
        Ok(())
    }

    async fn add_rule(&self, rule: &PolicyRule) -> Result<(), CoreError> {
        self.faults.check("add_rule")?;
        if self.rules.insert(rule.clone()) {
            self.journal.push(format!("rule add {rule}"));
        }
        Ok(())
    }

    async fn remove_rule(&self, rule: &PolicyRule) -> Result<(), CoreError> {
        self.faults.check("remove_rule")?;
        let removed = match rule.table {
            Some(_) => self.rules.remove(rule).is_some(),
            None => {
                // Like `ip rule del from X`: drops one rule for the source.
                let victim = self
                    .rules
                    .iter()
                    .find(|r| r.source == rule.source)
                    .map(|r| r.key().clone());
                victim.is_some_and(|v| self.rules.remove(&v).is_some())
            }
        };
        if !removed {
            return Err(CoreError::NotPresent {
                what: format!("rule {rule}"),
            });
        }
        self.journal.push(format!("rule del {rule}"));
        Ok(())
    }

    async fn main_routes(&self) -> Result<Vec<RouteEntry>, CoreError> {
        self.faults.check("main_routes")?;
        Ok(self.table(MAIN_TABLE).unwrap_or_default())
    }
}

// ── Services ────────────────────────────────────────────────────────

/// In-memory [`ServiceManager`].
#[derive(Debug, Default)]
pub struct MemoryServices {
    active: DashSet<String>,
    enabled: DashSet<String>,
    journal: Journal,
    faults: Faults,
}

impl MemoryServices {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self, unit: &str) -> bool {
        self.enabled.contains(unit)
    }

    pub fn fail_on(&self, operation: &'static str) {
        self.faults.0.insert(operation);
    }
}

#[async_trait]
impl ServiceManager for MemoryServices {
    async fn start(&self, unit: &str) -> Result<(), CoreError> {
        self.faults.check("start")?;
        self.active.insert(unit.to_owned());
        self.journal.push(format!("service start {unit}"));
        Ok(())
    }

    async fn stop(&self, unit: &str) -> Result<(), CoreError> {
        self.faults.check("stop")?;
        self.active.remove(unit);
        self.journal.push(format!("service stop {unit}"));
        Ok(())
    }

    async fn enable(&self, unit: &str) -> Result<(), CoreError> {
        self.faults.check("enable")?;
        self.enabled.insert(unit.to_owned());
        self.journal.push(format!("service enable {unit}"));
        Ok(())
    }

    async fn disable(&self, unit: &str) -> Result<(), CoreError> {
        self.faults.check("disable")?;
        self.enabled.remove(unit);
        self.journal.push(format!("service disable {unit}"));
        Ok(())
    }

    async fn is_active(&self, unit: &str) -> Result<bool, CoreError> {
        self.faults.check("is_active")?;
        Ok(self.active.contains(unit))
    }
}

// ── Directory ───────────────────────────────────────────────────────

/// In-memory [`DeviceDirectory`].
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    records: DashMap<MacAddress, DeviceRecord>,
}

impl MemoryDirectory {
    pub fn upsert(&self, record: DeviceRecord) {
        self.records.insert(record.mac.clone(), record);
    }

    pub fn remove(&self, mac: &MacAddress) {
        self.records.remove(mac);
    }
}

#[async_trait]
impl DeviceDirectory for MemoryDirectory {
    async fn fetch(&self, mac: &MacAddress) -> Result<DeviceRecord, CoreError> {
        self.records
            .get(mac)
            .map(|r| r.value().clone())
            .ok_or_else(|| CoreError::DeviceNotFound {
                mac: mac.to_string(),
            })
    }
}

// ── Probe ───────────────────────────────────────────────────────────

/// In-memory [`NetworkProbe`] with scriptable interface addresses.
#[derive(Debug, Default)]
pub struct MemoryProbe {
    interfaces: DashMap<String, Vec<PointToPoint>>,
    overlay_subnet: Option<Ipv4Net>,
    spoof_active: AtomicBool,
    faults: Faults,
}

impl MemoryProbe {
    pub fn new(overlay_subnet: Option<Ipv4Net>) -> Self {
        Self {
            overlay_subnet,
            ..Self::default()
        }
    }

    /// Report `local peer remote` on `interface` from now on.
    pub fn set_point_to_point(&self, interface: &str, local: Ipv4Addr, peer: Ipv4Addr) {
        self.interfaces
            .insert(interface.to_owned(), vec![PointToPoint { local, peer }]);
    }

    pub fn set_pairs(&self, interface: &str, pairs: Vec<PointToPoint>) {
        self.interfaces.insert(interface.to_owned(), pairs);
    }

    pub fn remove_interface(&self, interface: &str) {
        self.interfaces.remove(interface);
    }

    pub fn set_spoof_active(&self, active: bool) {
        self.spoof_active.store(active, Ordering::SeqCst);
    }

    pub fn fail_on(&self, operation: &'static str) {
        self.faults.0.insert(operation);
    }

    pub fn clear_faults(&self) {
        self.faults.0.clear();
    }
}

#[async_trait]
impl NetworkProbe for MemoryProbe {
    async fn point_to_point_addrs(&self, interface: &str) -> Result<Vec<PointToPoint>, CoreError> {
        self.faults.check("point_to_point_addrs")?;
        Ok(self
            .interfaces
            .get(interface)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn in_overlay_subnet(&self, ip: Ipv4Addr) -> Result<bool, CoreError> {
        self.faults.check("in_overlay_subnet")?;
        Ok(self.overlay_subnet.is_some_and(|net| net.contains(ip)))
    }

    async fn dhcp_spoof_active(&self) -> Result<bool, CoreError> {
        self.faults.check("dhcp_spoof_active")?;
        Ok(self.spoof_active.load(Ordering::SeqCst))
    }
}

// ── Bundle ──────────────────────────────────────────────────────────

/// All four in-memory collaborators sharing one journal, with typed
/// access for inspection next to the trait-object [`SystemHandles`].
#[derive(Debug, Clone)]
pub struct MemorySystem {
    pub journal: Journal,
    pub services: Arc<MemoryServices>,
    pub routing: Arc<MemoryRouting>,
    pub directory: Arc<MemoryDirectory>,
    pub probe: Arc<MemoryProbe>,
}

impl MemorySystem {
    pub fn new(overlay_subnet: Option<Ipv4Net>) -> Self {
        let journal = Journal::default();
        Self {
            services: Arc::new(MemoryServices::new(journal.clone())),
            routing: Arc::new(MemoryRouting::new(journal.clone())),
            directory: Arc::new(MemoryDirectory::default()),
            probe: Arc::new(MemoryProbe::new(overlay_subnet)),
            journal,
        }
    }

    pub fn handles(&self) -> SystemHandles {
        SystemHandles {
            services: self.services.clone(),
            routing: self.routing.clone(),
            directory: self.directory.clone(),
            probe: self.probe.clone(),
        }
    }
}
