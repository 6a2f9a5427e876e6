//! `tungate setup <profile>`.

use tungate_core::{Gateway, ProfileId};

use crate::cli::{GlobalOpts, ProfileArg};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    gateway: &Gateway,
    args: ProfileArg,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let controller = gateway.tunnel(&ProfileId::new(args.profile));
    controller.setup().await?;

    let profile = controller.profile().await;
    output::print_output(
        &output::status_line(
            global,
            true,
            &format!(
                "{} prepared ({})",
                profile.id,
                profile.credential_path.display()
            ),
        ),
        global.quiet,
    );
    Ok(())
}
