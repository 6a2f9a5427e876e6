// ── Per-tunnel route enforcement ──
//
// A tunnel's table mirrors the main table minus its default route, plus
// one default route through the tunnel's remote gateway. Devices whose
// traffic is policy-routed into the table keep LAN reachability and only
// their default-destined traffic enters the tunnel.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::locks::KeyedLocks;
use crate::model::{RouteEntry, table_name};
use crate::system::RoutingPrimitives;

/// Builds and flushes per-tunnel routing tables.
///
/// Work on the same interface is serialized; a refresh and a stop racing
/// on one tunnel cannot interleave their flush and repopulate steps.
pub struct RouteEnforcer {
    routing: Arc<dyn RoutingPrimitives>,
    locks: KeyedLocks,
}

impl RouteEnforcer {
    pub fn new(routing: Arc<dyn RoutingPrimitives>) -> Self {
        Self {
            routing,
            locks: KeyedLocks::new(),
        }
    }

    /// Create the table for `interface` if it does not exist yet.
    pub async fn ensure_table(&self, interface: &str) -> Result<String, CoreError> {
        let table = table_name(interface);
        self.routing.create_table(&table).await?;
        Ok(table)
    }

    /// Rebuild the table for `interface`: flush, mirror every non-default
    /// main route, then add the default route via `remote_gateway`.
    ///
    /// A main route the table rejects is logged and left out; only a
    /// failure to install the default route is an error. Calling it twice
    /// with the same inputs leaves the same table.
    pub async fn enforce_routes(
        &self,
        remote_gateway: Ipv4Addr,
        interface: &str,
    ) -> Result<(), CoreError> {
        let _guard = self.locks.lock(interface).await;
        let table = self.ensure_table(interface).await?;
        self.routing.flush_table(&table).await?;

        let main = match self.routing.main_routes().await {
            Ok(routes) => routes,
            Err(e) => {
                warn!(table = %table, error = %e, "cannot list main routes, installing default only");
                Vec::new()
            }
        };
        let mut mirrored = 0usize;
        for route in main.iter().filter(|route| !route.is_default()) {
            match self.routing.add_route(route, Some(&table)).await {
                Ok(()) => mirrored += 1,
                Err(e) => warn!(table = %table, route = %route, error = %e, "skipping main route"),
            }
        }

        let default = RouteEntry::default_via(remote_gateway, interface);
        self.routing.add_route(&default, Some(&table)).await?;

        info!(
            table = %table,
            remote = %remote_gateway,
            mirrored,
            "per-tunnel routes enforced"
        );
        Ok(())
    }

    /// Empty the table for `interface`. The table itself is kept for reuse.
    pub async fn flush_routes(&self, interface: &str) -> Result<(), CoreError> {
        let _guard = self.locks.lock(interface).await;
        let table = self.ensure_table(interface).await?;
        self.routing.flush_table(&table).await?;
        debug!(table = %table, "per-tunnel routes flushed");
        Ok(())
    }
}

impl std::fmt::Debug for RouteEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteEnforcer").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{Destination, Ipv4Net, PolicyRule};
    use crate::system::memory::{Journal, MemoryRouting};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    const REMOTE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    fn main_table() -> Vec<RouteEntry> {
        vec![
            RouteEntry::default_via(Ipv4Addr::new(192, 168, 1, 1), "eth0"),
            RouteEntry {
                destination: Destination::Prefix(net("192.168.1.0/24")),
                gateway: None,
                device: Some("eth0".into()),
                metric: Some(100),
            },
            RouteEntry {
                destination: Destination::Prefix(net("192.168.218.0/24")),
                gateway: None,
                device: Some("br0".into()),
                metric: None,
            },
        ]
    }

    fn setup(main: Vec<RouteEntry>) -> (Arc<MemoryRouting>, RouteEnforcer) {
        let routing = Arc::new(MemoryRouting::new(Journal::default()));
        routing.set_main_routes(main);
        let enforcer = RouteEnforcer::new(routing.clone());
        (routing, enforcer)
    }

    fn route_set(routes: &[RouteEntry]) -> HashSet<RouteEntry> {
        routes.iter().cloned().collect()
    }

    #[tokio::test]
    async fn enforce_mirrors_main_and_overrides_default() {
        let (routing, enforcer) = setup(main_table());
        enforcer.enforce_routes(REMOTE, "tun_abc").await.unwrap();

        let table = routing.table("tun_abc_table").unwrap();
        let mut expected = main_table()[1..].to_vec();
        expected.push(RouteEntry::default_via(REMOTE, "tun_abc"));
        assert_eq!(route_set(&table), route_set(&expected));
    }

    #[tokio::test]
    async fn enforce_is_idempotent() {
        let (routing, enforcer) = setup(main_table());
        enforcer.enforce_routes(REMOTE, "tun_abc").await.unwrap();
        let once = routing.table("tun_abc_table").unwrap();

        enforcer.enforce_routes(REMOTE, "tun_abc").await.unwrap();
        let twice = routing.table("tun_abc_table").unwrap();

        assert_eq!(once.len(), twice.len());
        assert_eq!(route_set(&once), route_set(&twice));
    }

    #[tokio::test]
    async fn enforce_with_empty_main_table_has_single_default() {
        let (routing, enforcer) = setup(Vec::new());
        enforcer.enforce_routes(REMOTE, "tun_abc").await.unwrap();

        let table = routing.table("tun_abc_table").unwrap();
        assert_eq!(table, vec![RouteEntry::default_via(REMOTE, "tun_abc")]);
    }

    #[tokio::test]
    async fn enforce_never_leaves_two_defaults() {
        let mut main = main_table();
        // A second default (e.g. a backup WAN) must not leak into the table.
        main.push(RouteEntry {
            destination: Destination::Prefix(net("0.0.0.0/0")),
            gateway: Some(Ipv4Addr::new(192, 168, 2, 1)),
            device: Some("eth1".into()),
            metric: Some(200),
        });
        let (routing, enforcer) = setup(main);

        enforcer.enforce_routes(REMOTE, "tun_abc").await.unwrap();
        enforcer
            .enforce_routes(Ipv4Addr::new(10, 0, 0, 9), "tun_abc")
            .await
            .unwrap();

        let table = routing.table("tun_abc_table").unwrap();
        let defaults: Vec<_> = table.iter().filter(|r| r.is_default()).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].gateway, Some(Ipv4Addr::new(10, 0, 0, 9)));
    }

    #[tokio::test]
    async fn flush_creates_and_empties_table() {
        let (routing, enforcer) = setup(main_table());
        enforcer.flush_routes("tun_new").await.unwrap();
        assert_eq!(routing.table("tun_new_table"), Some(Vec::new()));

        enforcer.enforce_routes(REMOTE, "tun_new").await.unwrap();
        enforcer.flush_routes("tun_new").await.unwrap();
        assert_eq!(routing.table("tun_new_table"), Some(Vec::new()));
    }

    /// Rejects additions of one destination and defers everything else.
    struct RejectingRouting {
        inner: MemoryRouting,
        rejected: Destination,
    }

    #[async_trait::async_trait]
    impl RoutingPrimitives for RejectingRouting {
        async fn create_table(&self, table: &str) -> Result<(), CoreError> {
            self.inner.create_table(table).await
        }
        async fn flush_table(&self, table: &str) -> Result<(), CoreError> {
            self.inner.flush_table(table).await
        }
        async fn add_route(&self, route: &RouteEntry, table: Option<&str>) -> Result<(), CoreError> {
            if route.destination == self.rejected {
                return Err(CoreError::CommandFailed {
                    program: "ip".into(),
                    args: format!("route replace {route}"),
                    status: "exit status: 2".into(),
                    stderr: "Error: inet prefix is expected rather than \"metric\".".into(),
                });
            }
            self.inner.add_route(route, table).await
        }
        async fn remove_route(
            &self,
            route: &RouteEntry,
            table: Option<&str>,
        ) -> Result<(), CoreError> {
            self.inner.remove_route(route, table).await
        }
        async fn add_rule(&self, rule: &PolicyRule) -> Result<(), CoreError> {
            self.inner.add_rule(rule).await
        }
        async fn remove_rule(&self, rule: &PolicyRule) -> Result<(), CoreError> {
            self.inner.remove_rule(rule).await
        }
        async fn main_routes(&self) -> Result<Vec<RouteEntry>, CoreError> {
            self.inner.main_routes().await
        }
    }

    #[tokio::test]
    async fn rejected_main_route_still_gets_default() {
        let bad = Destination::Prefix(net("10.20.0.0/16"));
        let mut main = main_table();
        main.insert(
            1,
            RouteEntry {
                destination: bad,
                gateway: None,
                device: None,
                metric: Some(10),
            },
        );
        let inner = MemoryRouting::new(Journal::default());
        inner.set_main_routes(main);
        let routing = Arc::new(RejectingRouting {
            inner,
            rejected: bad,
        });
        let enforcer = RouteEnforcer::new(routing.clone());

        enforcer.enforce_routes(REMOTE, "tun_abc").await.unwrap();

        let table = routing.inner.table("tun_abc_table").unwrap();
        let mut expected = main_table()[1..].to_vec();
        expected.push(RouteEntry::default_via(REMOTE, "tun_abc"));
        assert_eq!(route_set(&table), route_set(&expected));
    }

    #[tokio::test]
    async fn failed_default_route_is_an_error() {
        let (routing, enforcer) = setup(main_table());
        routing.fail_on("add_route");
        assert!(enforcer.enforce_routes(REMOTE, "tun_abc").await.is_err());
    }

    #[tokio::test]
    async fn enforce_propagates_primitive_failure() {
        let (routing, enforcer) = setup(main_table());
        routing.fail_on("flush_table");
        assert!(enforcer.enforce_routes(REMOTE, "tun_abc").await.is_err());
    }
}
