//! Configuration for the tungate gateway.
//!
//! TOML file (platform config dir, or an explicit path) layered over
//! built-in defaults and under `TUNGATE_` environment overrides, plus
//! translation to `tungate_core::GatewayConfig`. Nested keys use a double
//! underscore in the environment: `TUNGATE_TIMINGS__POLL_INTERVAL_SECS=1`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tungate_core::{
    AccessMode, AccessTimings, GatewayConfig, Ipv4Net, MacAddress, ProfileId, TunnelTimings,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Directory holding `<profile>.ovpn` and `<profile>.password`.
    #[serde(default = "default_profile_dir")]
    pub profile_dir: PathBuf,

    /// Service unit template; `{profile}` is replaced by the profile id.
    #[serde(default = "default_service_unit")]
    pub service_unit: String,

    #[serde(default = "default_rt_tables")]
    pub rt_tables: PathBuf,

    /// JSON array of host records (`mac`, `ip`, `monitored`).
    #[serde(default = "default_hosts_file")]
    pub hosts_file: PathBuf,

    /// Overlay subnet in CIDR form, e.g. "192.168.218.0/24".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_subnet: Option<String>,

    /// DHCP spoofing counts as active while this file exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spoof_marker: Option<PathBuf>,

    #[serde(default)]
    pub timings: Timings,

    /// Tunnel profiles keyed by profile id.
    #[serde(default)]
    pub tunnels: BTreeMap<String, TunnelEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile_dir: default_profile_dir(),
            service_unit: default_service_unit(),
            rt_tables: default_rt_tables(),
            hosts_file: default_hosts_file(),
            overlay_subnet: None,
            spoof_marker: None,
            timings: Timings::default(),
            tunnels: BTreeMap::new(),
        }
    }
}

fn default_profile_dir() -> PathBuf {
    "/etc/openvpn/client".into()
}
fn default_service_unit() -> String {
    "openvpn-client@{profile}".into()
}
fn default_rt_tables() -> PathBuf {
    "/etc/iproute2/rt_tables".into()
}
fn default_hosts_file() -> PathBuf {
    "/var/lib/tungate/hosts.json".into()
}

/// Loop timings, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Timings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_establish_timeout")]
    pub establish_timeout_secs: u64,

    #[serde(default = "default_refresh_interval")]
    pub route_refresh_interval_secs: u64,

    #[serde(default = "default_refresh_interval")]
    pub reconcile_interval_secs: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            establish_timeout_secs: default_establish_timeout(),
            route_refresh_interval_secs: default_refresh_interval(),
            reconcile_interval_secs: default_refresh_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    2
}
fn default_establish_timeout() -> u64 {
    20
}
fn default_refresh_interval() -> u64 {
    300
}

/// One tunnel profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TunnelEntry {
    /// Started by `tungate run` when no profiles are named.
    #[serde(default)]
    pub autostart: bool,

    /// Devices enabled on this tunnel when it comes up.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceEntry {
    pub mac: String,

    /// Access mode; only "dhcp" is supported.
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_mode() -> String {
    "dhcp".into()
}

impl DeviceEntry {
    pub fn mac(&self) -> MacAddress {
        MacAddress::new(&self.mac)
    }

    pub fn mode(&self) -> AccessMode {
        AccessMode::parse(&self.mode)
    }
}

impl Config {
    /// Profile ids marked `autostart`, in key order.
    pub fn autostart_profiles(&self) -> Vec<ProfileId> {
        self.tunnels
            .iter()
            .filter(|(_, entry)| entry.autostart)
            .map(|(id, _)| ProfileId::new(id.clone()))
            .collect()
    }

    /// Every configured profile id, in key order.
    pub fn profile_ids(&self) -> Vec<ProfileId> {
        self.tunnels.keys().cloned().map(ProfileId::new).collect()
    }

    pub fn tunnel(&self, id: &ProfileId) -> Option<&TunnelEntry> {
        self.tunnels.get(id.as_str())
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "tungate", "tungate").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("tungate");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults
/// (still subject to environment overrides).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TUNGATE_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

// ── Translation ─────────────────────────────────────────────────────

fn positive_secs(field: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Validation {
            field: field.into(),
            reason: "must be at least 1 second".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}

/// Validate `cfg` and build the core's runtime configuration.
pub fn to_gateway_config(cfg: &Config) -> Result<GatewayConfig, ConfigError> {
    let overlay_subnet = cfg
        .overlay_subnet
        .as_deref()
        .map(str::parse::<Ipv4Net>)
        .transpose()
        .map_err(|e| ConfigError::Validation {
            field: "overlay_subnet".into(),
            reason: e.to_string(),
        })?;

    if !cfg.service_unit.contains("{profile}") {
        return Err(ConfigError::Validation {
            field: "service_unit".into(),
            reason: format!("'{}' has no {{profile}} placeholder", cfg.service_unit),
        });
    }

    let t = &cfg.timings;
    let tunnel = TunnelTimings {
        poll_interval: positive_secs("timings.poll_interval_secs", t.poll_interval_secs)?,
        establish_timeout: positive_secs(
            "timings.establish_timeout_secs",
            t.establish_timeout_secs,
        )?,
        route_refresh_interval: positive_secs(
            "timings.route_refresh_interval_secs",
            t.route_refresh_interval_secs,
        )?,
    };
    if tunnel.establish_timeout < tunnel.poll_interval {
        return Err(ConfigError::Validation {
            field: "timings.establish_timeout_secs".into(),
            reason: "must not be shorter than the poll interval".into(),
        });
    }
    let access = AccessTimings {
        reconcile_interval: positive_secs(
            "timings.reconcile_interval_secs",
            t.reconcile_interval_secs,
        )?,
    };

    for (id, entry) in &cfg.tunnels {
        for device in &entry.devices {
            if let AccessMode::Unsupported(mode) = device.mode() {
                return Err(ConfigError::Validation {
                    field: format!("tunnels.{id}.devices.mode"),
                    reason: format!("unsupported access mode '{mode}' for {}", device.mac),
                });
            }
        }
    }

    Ok(GatewayConfig {
        profile_dir: cfg.profile_dir.clone(),
        service_unit: cfg.service_unit.clone(),
        rt_tables: cfg.rt_tables.clone(),
        hosts_file: cfg.hosts_file.clone(),
        overlay_subnet,
        spoof_marker: cfg.spoof_marker.clone(),
        tunnel,
        access,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
profile_dir = "/srv/vpn"
overlay_subnet = "192.168.218.0/24"

[timings]
poll_interval_secs = 1

[tunnels.abc]
autostart = true

[[tunnels.abc.devices]]
mac = "AA-BB-CC-DD-EE-FF"

[tunnels.xyz]
"#;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let cfg = load_config_from(Path::new("absent.toml")).unwrap();
            assert_eq!(cfg, Config::default());
            Ok(())
        });
    }

    #[test]
    fn file_values_layer_over_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("tungate.toml", SAMPLE)?;
            let cfg = load_config_from(Path::new("tungate.toml")).unwrap();

            assert_eq!(cfg.profile_dir, PathBuf::from("/srv/vpn"));
            assert_eq!(cfg.service_unit, "openvpn-client@{profile}");
            assert_eq!(cfg.timings.poll_interval_secs, 1);
            assert_eq!(cfg.timings.establish_timeout_secs, 20);
            assert_eq!(cfg.autostart_profiles(), vec![ProfileId::from("abc")]);
            assert_eq!(
                cfg.profile_ids(),
                vec![ProfileId::from("abc"), ProfileId::from("xyz")]
            );

            let device = &cfg.tunnel(&ProfileId::from("abc")).unwrap().devices[0];
            assert_eq!(device.mac().as_str(), "aa:bb:cc:dd:ee:ff");
            assert_eq!(device.mode(), AccessMode::Dhcp);
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("tungate.toml", SAMPLE)?;
            jail.set_env("TUNGATE_PROFILE_DIR", "/opt/vpn");
            jail.set_env("TUNGATE_TIMINGS__ESTABLISH_TIMEOUT_SECS", "45");
            let cfg = load_config_from(Path::new("tungate.toml")).unwrap();

            assert_eq!(cfg.profile_dir, PathBuf::from("/opt/vpn"));
            assert_eq!(cfg.timings.establish_timeout_secs, 45);
            assert_eq!(cfg.timings.poll_interval_secs, 1);
            Ok(())
        });
    }

    #[test]
    fn translates_to_gateway_config() {
        let cfg: Config = toml::from_str(SAMPLE).unwrap();
        let gateway = to_gateway_config(&cfg).unwrap();

        assert_eq!(gateway.profile_dir, PathBuf::from("/srv/vpn"));
        assert_eq!(
            gateway.overlay_subnet,
            Some("192.168.218.0/24".parse().unwrap())
        );
        assert_eq!(gateway.tunnel.poll_interval, Duration::from_secs(1));
        assert_eq!(gateway.tunnel.establish_timeout, Duration::from_secs(20));
        assert_eq!(gateway.access.reconcile_interval, Duration::from_secs(300));
    }

    #[test]
    fn rejects_bad_subnet() {
        let cfg = Config {
            overlay_subnet: Some("192.168.218.0/40".into()),
            ..Config::default()
        };
        let err = to_gateway_config(&cfg).unwrap_err();
        assert!(
            matches!(err, ConfigError::Validation { ref field, .. } if field == "overlay_subnet")
        );
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let mut cfg = Config::default();
        cfg.timings.poll_interval_secs = 0;
        assert!(to_gateway_config(&cfg).is_err());
    }

    #[test]
    fn rejects_timeout_shorter_than_poll() {
        let mut cfg = Config::default();
        cfg.timings.poll_interval_secs = 30;
        let err = to_gateway_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("establish_timeout_secs"));
    }

    #[test]
    fn rejects_unit_without_placeholder() {
        let cfg = Config {
            service_unit: "openvpn".into(),
            ..Config::default()
        };
        assert!(to_gateway_config(&cfg).is_err());
    }

    #[test]
    fn rejects_unsupported_device_mode() {
        let mut cfg = Config::default();
        cfg.tunnels.insert(
            "abc".into(),
            TunnelEntry {
                autostart: false,
                devices: vec![DeviceEntry {
                    mac: "aa:bb:cc:dd:ee:ff".into(),
                    mode: "static".into(),
                }],
            },
        );
        let err = to_gateway_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("static"));
    }

    #[test]
    fn save_then_load_keeps_tunnels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg: Config = toml::from_str(SAMPLE).unwrap();

        save_config_to(&cfg, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let reloaded: Config = toml::from_str(&text).unwrap();
        assert_eq!(reloaded, cfg);
    }
}
