//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use tungate_config::ConfigError;
use tungate_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const TUNNEL: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Tunnels ──────────────────────────────────────────────────────
    #[error("Tunnel '{profile}' did not come up")]
    #[diagnostic(
        code(tungate::tunnel_failed),
        help(
            "The service started but no remote gateway appeared on the interface,\n\
             or the service could not be started. Check: journalctl -u {unit}"
        )
    )]
    TunnelFailed { profile: String, unit: String },

    #[error("No tunnels to run")]
    #[diagnostic(
        code(tungate::no_tunnels),
        help("Pass --profile <id>, or set autostart = true on a [tunnels.<id>] entry.")
    )]
    NoTunnels,

    // ── Resources ────────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(
        code(tungate::profile_config),
        help(
            "Place the VPN client config at <profile_dir>/<id>.ovpn,\n\
             or point profile_dir at the directory holding it."
        )
    )]
    ProfileConfig { message: String },

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(code(tungate::not_found), help("{hint}"))]
    NotFound {
        resource_type: String,
        identifier: String,
        hint: String,
    },

    #[error("{path} already exists")]
    #[diagnostic(
        code(tungate::conflict),
        help("Use --force to overwrite it.")
    )]
    AlreadyExists { path: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(tungate::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(tungate::config),
        help("Inspect the resolved configuration with: tungate config show")
    )]
    Config(ConfigError),

    #[error(transparent)]
    #[diagnostic(code(tungate::core))]
    Core(CoreError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(tungate::render))]
    Render(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::TunnelFailed { .. } => exit_code::TUNNEL,
            Self::ProfileConfig { .. } | Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::AlreadyExists { .. } => exit_code::CONFLICT,
            Self::Validation { .. } | Self::NoTunnels => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── Library error mapping ────────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config { message } => Self::ProfileConfig { message },
            CoreError::DeviceNotFound { mac } => Self::NotFound {
                resource_type: "device".into(),
                identifier: mac,
                hint: "Add the device to the hosts file named by hosts_file.".into(),
            },
            CoreError::Validation { message } => Self::Validation {
                field: "input".into(),
                reason: message,
            },
            other => Self::Core(other),
        }
    }
}
