//! Config subcommand handlers.

use std::path::PathBuf;

use tungate_config::{self as config, Config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Config file in effect: `--config` / `TUNGATE_CONFIG`, else the
/// platform default.
pub fn resolved_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config::config_path)
}

/// Load the layered configuration for this invocation.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(config::load_config_from(&resolved_path(global))?)
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init { force } => {
            let path = resolved_path(global);
            if path.exists() && !force {
                return Err(CliError::AlreadyExists {
                    path: path.display().to_string(),
                });
            }
            config::save_config_to(&Config::default(), &path)?;
            if !global.quiet {
                eprintln!("Wrote default config to {}", path.display());
            }
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = load(global)?;
            let rendered =
                toml::to_string_pretty(&cfg).map_err(|e| CliError::Render(e.to_string()))?;
            output::print_output(rendered.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&resolved_path(global).display().to_string(), global.quiet);
            Ok(())
        }
    }
}
