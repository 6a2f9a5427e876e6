#![allow(clippy::unwrap_used)]
// Device access decisions and reconciliation against the in-memory system.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use tungate_core::system::RoutingPrimitives;
use tungate_core::system::memory::MemorySystem;
use tungate_core::{
    AccessController, AccessMode, AccessOutcome, AccessTimings, CoreError, DeviceRecord,
    MacAddress, PolicyRule, RouteEnforcer,
};

const IFACE: &str = "tun_abc";
const TABLE: &str = "tun_abc_table";
const OVERLAY_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 218, 20);
const LAN_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);

// ── Helpers ─────────────────────────────────────────────────────────

fn setup() -> (MemorySystem, Arc<AccessController>) {
    let system = MemorySystem::new(Some("192.168.218.0/24".parse().unwrap()));
    let access = AccessController::new(
        system.handles(),
        Arc::new(RouteEnforcer::new(system.routing.clone())),
        AccessTimings::default(),
    );
    (system, Arc::new(access))
}

fn device(system: &MemorySystem, mac: &str, ip: Option<Ipv4Addr>, monitored: bool) -> MacAddress {
    let mac = MacAddress::new(mac);
    system.directory.upsert(DeviceRecord {
        mac: mac.clone(),
        ip,
        monitored,
    });
    mac
}

// ── Decision table ──────────────────────────────────────────────────

#[tokio::test]
async fn test_overlay_member_monitored_gets_rule() {
    let (system, access) = setup();
    let mac = device(&system, "aa:bb:cc:dd:ee:01", Some(OVERLAY_IP), true);
    // A leftover rule for the address pointing elsewhere is replaced.
    assert_ok!(
        system
            .routing
            .add_rule(&PolicyRule::new(OVERLAY_IP, "main"))
            .await
    );

    let outcome = assert_ok!(access.enable(&mac, AccessMode::Dhcp, IFACE).await);

    assert_eq!(outcome, AccessOutcome::RuleInstalled);
    assert_eq!(system.routing.rules(), vec![PolicyRule::new(OVERLAY_IP, TABLE)]);
    assert!(system.routing.has_table(TABLE));
    assert!(access.is_enabled(&mac));
}

#[tokio::test]
async fn test_eligible_but_unmonitored_is_recorded_without_rule() {
    let (system, access) = setup();
    let mac = device(&system, "aa:bb:cc:dd:ee:02", Some(OVERLAY_IP), false);

    let outcome = assert_ok!(access.enable(&mac, AccessMode::Dhcp, IFACE).await);

    assert_eq!(outcome, AccessOutcome::NotMonitored);
    assert!(system.routing.rules().is_empty());
    assert!(access.is_enabled(&mac));
}

#[tokio::test]
async fn test_unmonitored_device_gets_no_rule_even_with_spoofing() {
    let (system, access) = setup();
    system.probe.set_spoof_active(true);
    let mac = device(&system, "aa:bb:cc:dd:ee:15", Some(OVERLAY_IP), false);

    let outcome = assert_ok!(access.enable(&mac, AccessMode::Dhcp, IFACE).await);

    assert_eq!(outcome, AccessOutcome::NotMonitored);
    assert!(system.routing.rules().is_empty());
    assert!(access.is_enabled(&mac));
}

#[tokio::test]
async fn test_outside_overlay_without_spoofing_is_suspended() {
    let (system, access) = setup();
    let mac = device(&system, "aa:bb:cc:dd:ee:03", Some(LAN_IP), true);

    let outcome = assert_ok!(access.enable(&mac, AccessMode::Dhcp, IFACE).await);

    assert_eq!(outcome, AccessOutcome::Suspended);
    assert!(system.routing.rules().is_empty());
    assert!(access.is_enabled(&mac));
}

#[tokio::test]
async fn test_spoofing_makes_lan_device_eligible() {
    let (system, access) = setup();
    system.probe.set_spoof_active(true);
    let mac = device(&system, "aa:bb:cc:dd:ee:04", Some(LAN_IP), true);

    let outcome = assert_ok!(access.enable(&mac, AccessMode::Dhcp, IFACE).await);

    assert_eq!(outcome, AccessOutcome::RuleInstalled);
    assert!(system.routing.has_rule(&PolicyRule::new(LAN_IP, TABLE)));
}

#[tokio::test]
async fn test_device_without_address_is_suspended() {
    let (system, access) = setup();
    system.probe.set_spoof_active(true);
    let mac = device(&system, "aa:bb:cc:dd:ee:05", None, true);

    let outcome = assert_ok!(access.enable(&mac, AccessMode::Dhcp, IFACE).await);

    assert_eq!(outcome, AccessOutcome::Suspended);
    assert!(access.is_enabled(&mac));
}

#[tokio::test]
async fn test_unsupported_mode_changes_nothing() {
    let (system, access) = setup();
    let mac = device(&system, "aa:bb:cc:dd:ee:06", Some(OVERLAY_IP), true);

    let outcome = assert_ok!(
        access
            .enable(&mac, AccessMode::parse("static"), IFACE)
            .await
    );

    assert_eq!(outcome, AccessOutcome::UnsupportedMode);
    assert!(!access.is_enabled(&mac));
    assert!(system.journal.entries().is_empty());
}

#[tokio::test]
async fn test_unknown_device_is_an_error() {
    let (_system, access) = setup();
    let err = assert_err!(
        access
            .enable(&MacAddress::new("aa:bb:cc:dd:ee:99"), AccessMode::Dhcp, IFACE)
            .await
    );
    assert!(matches!(err, CoreError::DeviceNotFound { .. }));
}

// ── Disable ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_disable_unknown_device_is_noop() {
    let (system, access) = setup();
    assert!(!access.disable(&MacAddress::new("aa:bb:cc:dd:ee:77")).await);
    assert!(system.journal.entries().is_empty());
}

#[tokio::test]
async fn test_disable_removes_rule_and_record() {
    let (system, access) = setup();
    let mac = device(&system, "aa:bb:cc:dd:ee:08", Some(OVERLAY_IP), true);
    assert_ok!(access.enable(&mac, AccessMode::Dhcp, IFACE).await);

    assert!(access.disable(&mac).await);

    assert!(system.routing.rules().is_empty());
    assert!(!access.is_enabled(&mac));
    assert!(access.enabled_devices().is_empty());
}

#[tokio::test]
async fn test_disable_suspended_device_tolerates_missing_rule() {
    let (system, access) = setup();
    let mac = device(&system, "aa:bb:cc:dd:ee:09", Some(LAN_IP), true);
    assert_ok!(access.enable(&mac, AccessMode::Dhcp, IFACE).await);

    assert!(access.disable(&mac).await);
    assert!(!access.is_enabled(&mac));
}

// ── Reconciliation ──────────────────────────────────────────────────

#[tokio::test]
async fn test_reconcile_follows_address_change() {
    let (system, access) = setup();
    let mac = device(&system, "aa:bb:cc:dd:ee:10", Some(OVERLAY_IP), true);
    assert_ok!(access.enable(&mac, AccessMode::Dhcp, IFACE).await);

    let moved = Ipv4Addr::new(192, 168, 218, 21);
    device(&system, "aa:bb:cc:dd:ee:10", Some(moved), true);
    let summary = access.reconcile_once().await;

    assert_eq!(summary.checked, 1);
    assert_eq!(summary.rules_removed, 1);
    assert_eq!(summary.rules_installed, 1);
    assert_eq!(system.routing.rules(), vec![PolicyRule::new(moved, TABLE)]);
    assert_eq!(access.enabled_devices()[0].snapshot.ip, Some(moved));
}

#[tokio::test]
async fn test_reconcile_installs_once_monitoring_starts() {
    let (system, access) = setup();
    let mac = device(&system, "aa:bb:cc:dd:ee:11", Some(OVERLAY_IP), false);
    assert_ok!(access.enable(&mac, AccessMode::Dhcp, IFACE).await);
    assert!(system.routing.rules().is_empty());

    device(&system, "aa:bb:cc:dd:ee:11", Some(OVERLAY_IP), true);
    access.reconcile_once().await;

    assert!(system.routing.has_rule(&PolicyRule::new(OVERLAY_IP, TABLE)));
    assert!(access.enabled_devices()[0].snapshot.monitored);
}

#[tokio::test]
async fn test_reconcile_removes_rule_when_monitoring_stops() {
    let (system, access) = setup();
    let mac = device(&system, "aa:bb:cc:dd:ee:12", Some(OVERLAY_IP), true);
    assert_ok!(access.enable(&mac, AccessMode::Dhcp, IFACE).await);

    device(&system, "aa:bb:cc:dd:ee:12", Some(OVERLAY_IP), false);
    access.reconcile_once().await;

    assert!(system.routing.rules().is_empty());
    // Still enabled; only an explicit disable drops the record.
    assert!(access.is_enabled(&mac));
}

#[tokio::test]
async fn test_reconcile_follows_spoof_mode() {
    let (system, access) = setup();
    let mac = device(&system, "aa:bb:cc:dd:ee:16", Some(LAN_IP), true);
    let rule = PolicyRule::new(LAN_IP, TABLE);

    let outcome = assert_ok!(access.enable(&mac, AccessMode::Dhcp, IFACE).await);
    assert_eq!(outcome, AccessOutcome::Suspended);
    assert!(system.routing.rules().is_empty());

    system.probe.set_spoof_active(true);
    let summary = access.reconcile_once().await;
    assert_eq!(summary.rules_installed, 1);
    assert_eq!(system.routing.rules(), vec![rule]);

    system.probe.set_spoof_active(false);
    let summary = access.reconcile_once().await;
    assert_eq!(summary.rules_removed, 1);
    assert!(system.routing.rules().is_empty());
    assert!(access.is_enabled(&mac));
}

#[tokio::test]
async fn test_reconcile_follows_overlay_membership() {
    let (system, access) = setup();
    let mac = device(&system, "aa:bb:cc:dd:ee:17", Some(OVERLAY_IP), true);
    assert_ok!(access.enable(&mac, AccessMode::Dhcp, IFACE).await);

    device(&system, "aa:bb:cc:dd:ee:17", Some(LAN_IP), true);
    access.reconcile_once().await;
    assert!(system.routing.rules().is_empty());
    assert!(access.is_enabled(&mac));

    device(&system, "aa:bb:cc:dd:ee:17", Some(OVERLAY_IP), true);
    access.reconcile_once().await;
    assert_eq!(system.routing.rules(), vec![PolicyRule::new(OVERLAY_IP, TABLE)]);
}

#[tokio::test]
async fn test_reconcile_skips_unreadable_device() {
    let (system, access) = setup();
    let mac = device(&system, "aa:bb:cc:dd:ee:13", Some(OVERLAY_IP), true);
    assert_ok!(access.enable(&mac, AccessMode::Dhcp, IFACE).await);

    system.directory.remove(&mac);
    let summary = access.reconcile_once().await;

    assert_eq!(summary.skipped, 1);
    assert!(system.routing.has_rule(&PolicyRule::new(OVERLAY_IP, TABLE)));
    assert_eq!(access.enabled_devices()[0].snapshot.ip, Some(OVERLAY_IP));
}

#[tokio::test(start_paused = true)]
async fn test_reconciler_runs_on_interval_until_cancelled() {
    let (system, access) = setup();
    let mac = device(&system, "aa:bb:cc:dd:ee:14", Some(OVERLAY_IP), true);
    assert_ok!(access.enable(&mac, AccessMode::Dhcp, IFACE).await);

    let cancel = CancellationToken::new();
    let task = access.spawn_reconciler(cancel.clone());

    let moved = Ipv4Addr::new(192, 168, 218, 22);
    device(&system, "aa:bb:cc:dd:ee:14", Some(moved), true);
    tokio::time::sleep(Duration::from_secs(299)).await;
    assert!(system.routing.has_rule(&PolicyRule::new(OVERLAY_IP, TABLE)));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(system.routing.rules(), vec![PolicyRule::new(moved, TABLE)]);

    cancel.cancel();
    task.await.unwrap();
}
