//! Clap derive structures for the `tungate` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// tungate -- VPN client tunnels and per-device policy routing
#[derive(Debug, Parser)]
#[command(
    name = "tungate",
    version,
    about = "Manage VPN client tunnels and which devices route through them",
    long_about = "Brings up VPN client tunnels on a gateway, keeps a per-tunnel routing\n\
        table in sync with the tunnel's remote endpoint, and policy-routes\n\
        explicitly enabled LAN devices through it.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "TUNGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Log line format on stderr
    #[arg(long, env = "TUNGATE_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Simulate services, routes, and interfaces in memory; touch nothing
    #[arg(long, global = true)]
    pub dry_run: bool,
}

// ── Enums ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check a profile's config, patch deprecated directives, create its
    /// credential file
    Setup(ProfileArg),

    /// Show whether tunnel services are active
    #[command(alias = "st")]
    Status(StatusArgs),

    /// Flush a tunnel's routes, then stop and disable its service
    Stop(ProfileArg),

    /// Bring tunnels up, enable their devices, and keep both in sync
    Run(RunArgs),

    /// Manage the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct ProfileArg {
    /// Profile id (the `<id>.ovpn` file name without extension)
    pub profile: String,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Profiles to check (defaults to every configured tunnel)
    pub profiles: Vec<String>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Profiles to bring up (defaults to tunnels marked autostart)
    #[arg(long = "profile", short = 'p')]
    pub profiles: Vec<String>,

    /// Run one reconciliation pass, tear down, and exit instead of waiting
    /// for ctrl-c
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display current resolved configuration
    Show,

    /// Print the config file path
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
