// ── Linux command-backed collaborators ──
//
// `systemctl` for the service manager, iproute2 for routing and
// interface introspection. Every call is a child process awaited on the
// tokio runtime; nothing here keeps kernel state of its own.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::parse::{parse_point_to_point, parse_routes, parse_rt_tables, parse_rules};
use super::{NetworkProbe, RoutingPrimitives, ServiceManager};
use crate::error::CoreError;
use crate::model::{Ipv4Net, PointToPoint, PolicyRule, RouteEntry};

/// Table ids handed out to per-tunnel tables.
const TABLE_ID_RANGE: std::ops::Range<u32> = 10_000..20_000;

/// stderr fragments meaning "the thing you tried to remove is not there".
const ABSENT_MARKERS: &[&str] = &[
    "No such process",
    "No such file or directory",
    "Cannot find device",
    "does not exist",
];

// ── Command runner ──────────────────────────────────────────────────

/// Run `program args..`, returning stdout on success.
async fn run(program: &str, args: &[&str]) -> Result<String, CoreError> {
    debug!(program, args = %args.join(" "), "exec");
    let output = Command::new(program).args(args).output().await?;
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }
    Err(CoreError::CommandFailed {
        program: program.to_owned(),
        args: args.join(" "),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
    })
}

/// Like [`run`], but reclassify "not found" failures as `NotPresent`.
async fn run_removal(program: &str, args: &[&str], what: String) -> Result<(), CoreError> {
    match run(program, args).await {
        Ok(_) => Ok(()),
        Err(CoreError::CommandFailed { ref stderr, .. })
            if ABSENT_MARKERS.iter().any(|m| stderr.contains(m)) =>
        {
            Err(CoreError::NotPresent { what })
        }
        Err(e) => Err(e),
    }
}

// ── systemd ─────────────────────────────────────────────────────────

/// [`ServiceManager`] backed by `systemctl`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemdServices;

#[async_trait]
impl ServiceManager for SystemdServices {
    async fn start(&self, unit: &str) -> Result<(), CoreError> {
        run("systemctl", &["start", unit]).await.map(drop)
    }

    async fn stop(&self, unit: &str) -> Result<(), CoreError> {
        run("systemctl", &["stop", unit]).await.map(drop)
    }

    async fn enable(&self, unit: &str) -> Result<(), CoreError> {
        run("systemctl", &["enable", unit]).await.map(drop)
    }

    async fn disable(&self, unit: &str) -> Result<(), CoreError> {
        run("systemctl", &["disable", unit]).await.map(drop)
    }

    async fn is_active(&self, unit: &str) -> Result<bool, CoreError> {
        // Non-zero exit just means "not active".
        let status = Command::new("systemctl")
            .args(["is-active", "--quiet", unit])
            .status()
            .await?;
        Ok(status.success())
    }
}

// ── iproute2 routing ────────────────────────────────────────────────

/// [`RoutingPrimitives`] backed by the `ip` tool.
///
/// Named tables are registered in the rt_tables file on first use.
#[derive(Debug)]
pub struct IpRouting {
    rt_tables: PathBuf,
    registry_lock: Mutex<()>,
}

impl IpRouting {
    pub fn new(rt_tables: impl Into<PathBuf>) -> Self {
        Self {
            rt_tables: rt_tables.into(),
            registry_lock: Mutex::new(()),
        }
    }

    /// Raw registry contents; a missing file reads as empty.
    async fn read_registry(&self) -> Result<String, CoreError> {
        match tokio::fs::read_to_string(&self.rt_tables).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

fn route_args(route: &RouteEntry) -> Vec<String> {
    let mut args = vec![route.destination.to_string()];
    if let Some(gw) = route.gateway {
        args.extend(["via".to_owned(), gw.to_string()]);
    }
    if let Some(ref dev) = route.device {
        args.extend(["dev".to_owned(), dev.clone()]);
    }
    if let Some(metric) = route.metric {
        args.extend(["metric".to_owned(), metric.to_string()]);
    }
    args
}

fn rule_args(rule: &PolicyRule) -> Vec<String> {
    let mut args = vec!["from".to_owned(), rule.source.to_string()];
    if let Some(ref table) = rule.table {
        args.extend(["lookup".to_owned(), table.clone()]);
    }
    args
}

fn as_strs(args: &[String]) -> Vec<&str> {
    args.iter().map(String::as_str).collect()
}

#[async_trait]
impl RoutingPrimitives for IpRouting {
    async fn create_table(&self, table: &str) -> Result<(), CoreError> {
        let _guard = self.registry_lock.lock().await;
        let contents = self.read_registry().await?;
        let registered = parse_rt_tables(&contents);
        if registered.iter().any(|(_, name)| name == table) {
            return Ok(());
        }
        let id = TABLE_ID_RANGE
            .clone()
            .find(|candidate| registered.iter().all(|(id, _)| id != candidate))
            .ok_or_else(|| CoreError::Config {
                message: format!(
                    "no free routing table id left in {}",
                    self.rt_tables.display()
                ),
            })?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.rt_tables)
            .await?;
        // A last line without its newline would swallow our entry.
        let separator = if contents.is_empty() || contents.ends_with('\n') {
            ""
        } else {
            "\n"
        };
        file.write_all(format!("{separator}{id}\t{table}\n").as_bytes()).await?;
        file.flush().await?;
        info!(table, id, "registered routing table");
        Ok(())
    }

    async fn flush_table(&self, table: &str) -> Result<(), CoreError> {
        run("ip", &["-4", "route", "flush", "table", table])
            .await
            .map(drop)
    }

    /// Uses `ip route replace`, so re-adding an existing route succeeds.
    async fn add_route(&self, route: &RouteEntry, table: Option<&str>) -> Result<(), CoreError> {
        let mut args = vec!["-4".to_owned(), "route".to_owned(), "replace".to_owned()];
        args.extend(route_args(route));
        args.extend(["table".to_owned(), table.unwrap_or("main").to_owned()]);
        run("ip", &as_strs(&args)).await.map(drop)
    }

    async fn remove_route(
        &self,
        route: &RouteEntry,
        table: Option<&str>,
    ) -> Result<(), CoreError> {
        let mut args = vec!["-4".to_owned(), "route".to_owned(), "del".to_owned()];
        args.extend(route_args(route));
        args.extend(["table".to_owned(), table.unwrap_or("main").to_owned()]);
        run_removal("ip", &as_strs(&args), format!("route {route}")).await
    }

    async fn add_rule(&self, rule: &PolicyRule) -> Result<(), CoreError> {
        let existing = parse_rules(&run("ip", &["-4", "rule", "show"]).await?);
        if existing.contains(rule) {
            debug!(%rule, "policy rule already present");
            return Ok(());
        }
        let mut args = vec!["-4".to_owned(), "rule".to_owned(), "add".to_owned()];
        args.extend(rule_args(rule));
        run("ip", &as_strs(&args)).await.map(drop)
    }

    async fn remove_rule(&self, rule: &PolicyRule) -> Result<(), CoreError> {
        let mut args = vec!["-4".to_owned(), "rule".to_owned(), "del".to_owned()];
        args.extend(rule_args(rule));
        run_removal("ip", &as_strs(&args), format!("rule {rule}")).await
    }

    async fn main_routes(&self) -> Result<Vec<RouteEntry>, CoreError> {
        let output = run("ip", &["-4", "route", "show", "table", "main"]).await?;
        Ok(parse_routes(&output))
    }
}

// ── Interface / subnet probe ────────────────────────────────────────

/// [`NetworkProbe`] reading interfaces via `ip`, with the overlay subnet
/// taken from configuration and spoof mode signalled by a marker file.
#[derive(Debug, Clone)]
pub struct LinuxProbe {
    overlay_subnet: Option<Ipv4Net>,
    spoof_marker: Option<PathBuf>,
}

impl LinuxProbe {
    pub fn new(overlay_subnet: Option<Ipv4Net>, spoof_marker: Option<PathBuf>) -> Self {
        Self {
            overlay_subnet,
            spoof_marker,
        }
    }
}

#[async_trait]
impl NetworkProbe for LinuxProbe {
    async fn point_to_point_addrs(&self, interface: &str) -> Result<Vec<PointToPoint>, CoreError> {
        match run("ip", &["-4", "addr", "show", "dev", interface]).await {
            Ok(output) => Ok(parse_point_to_point(&output)),
            Err(CoreError::CommandFailed { ref stderr, .. }) if stderr.contains("does not exist") => {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn in_overlay_subnet(&self, ip: Ipv4Addr) -> Result<bool, CoreError> {
        Ok(self.overlay_subnet.is_some_and(|net| net.contains(ip)))
    }

    async fn dhcp_spoof_active(&self) -> Result<bool, CoreError> {
        match self.spoof_marker {
            Some(ref marker) => Ok(tokio::fs::try_exists(marker).await?),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Destination;

    #[test]
    fn route_args_include_only_present_fields() {
        let route = RouteEntry {
            destination: Destination::Prefix("192.168.1.0/24".parse().unwrap()),
            gateway: None,
            device: Some("eth0".into()),
            metric: Some(100),
        };
        assert_eq!(
            route_args(&route),
            ["192.168.1.0/24", "dev", "eth0", "metric", "100"]
        );
    }

    #[test]
    fn rule_args_without_table_match_any() {
        let rule = PolicyRule::any_table(Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(rule_args(&rule), ["from", "192.168.1.20"]);
    }

    #[tokio::test]
    async fn create_table_registers_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt_tables");
        std::fs::write(&path, "255\tlocal\n254\tmain\n10000\tother_table\n").unwrap();

        let routing = IpRouting::new(&path);
        routing.create_table("tun_abc_table").await.unwrap();
        routing.create_table("tun_abc_table").await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("tun_abc_table").count(), 1);
        assert!(contents.contains("10001\ttun_abc_table"));
    }

    #[tokio::test]
    async fn create_table_terminates_unfinished_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt_tables");
        std::fs::write(&path, "254\tmain\n10000\tother_table").unwrap();

        let routing = IpRouting::new(&path);
        routing.create_table("tun_abc_table").await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "254\tmain\n10000\tother_table\n10001\ttun_abc_table\n");
        let tables = parse_rt_tables(&contents);
        assert!(tables.contains(&(10000, "other_table".to_owned())));
        assert!(tables.contains(&(10001, "tun_abc_table".to_owned())));
    }

    #[tokio::test]
    async fn create_table_creates_missing_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt_tables");

        IpRouting::new(&path).create_table("tun_x_table").await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "10000\ttun_x_table\n");
    }

    #[tokio::test]
    async fn probe_uses_configured_overlay_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spoof");
        let probe = LinuxProbe::new(Some("192.168.218.0/24".parse().unwrap()), Some(marker.clone()));

        assert!(probe.in_overlay_subnet(Ipv4Addr::new(192, 168, 218, 9)).await.unwrap());
        assert!(!probe.in_overlay_subnet(Ipv4Addr::new(192, 168, 1, 9)).await.unwrap());
        assert!(!probe.dhcp_spoof_active().await.unwrap());

        std::fs::write(&marker, "").unwrap();
        assert!(probe.dhcp_spoof_active().await.unwrap());
    }
}
