//! Command dispatch: bridges CLI args -> gateway operations -> output.

pub mod config_cmd;
pub mod run;
pub mod setup;
pub mod status;
pub mod stop;

use tungate_config::Config;
use tungate_core::Gateway;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a gateway-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    gateway: &Gateway,
    cfg: &Config,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Setup(args) => setup::handle(gateway, args, global).await,
        Command::Status(args) => status::handle(gateway, cfg, args, global).await,
        Command::Stop(args) => stop::handle(gateway, args, global).await,
        Command::Run(args) => run::handle(gateway, cfg, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
