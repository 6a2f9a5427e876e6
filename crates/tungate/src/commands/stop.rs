//! `tungate stop <profile>`.

use tungate_core::{Gateway, ProfileId};

use crate::cli::{GlobalOpts, ProfileArg};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    gateway: &Gateway,
    args: ProfileArg,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let id = ProfileId::new(args.profile);
    let controller = gateway.tunnel(&id);
    // Failures inside stop are logged and skipped; the remaining steps
    // always run.
    controller.stop().await;

    let line = format!("{id} stopped ({})", controller.service_unit());
    output::print_output(&output::status_line(global, true, &line), global.quiet);
    Ok(())
}
