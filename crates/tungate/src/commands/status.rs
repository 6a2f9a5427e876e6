//! `tungate status [profile...]`.

use serde::Serialize;
use tabled::Tabled;

use tungate_config::Config;
use tungate_core::{Gateway, ProfileId, table_name};

use crate::cli::{GlobalOpts, StatusArgs};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct TunnelStatus {
    profile: String,
    unit: String,
    interface: String,
    table: String,
    active: bool,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Profile")]
    profile: String,
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Interface")]
    interface: String,
    #[tabled(rename = "Table")]
    table: String,
    #[tabled(rename = "Active")]
    active: &'static str,
}

impl From<&TunnelStatus> for StatusRow {
    fn from(s: &TunnelStatus) -> Self {
        Self {
            profile: s.profile.clone(),
            unit: s.unit.clone(),
            interface: s.interface.clone(),
            table: s.table.clone(),
            active: if s.active { "yes" } else { "no" },
        }
    }
}

pub async fn handle(
    gateway: &Gateway,
    cfg: &Config,
    args: StatusArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let profiles: Vec<ProfileId> = if args.profiles.is_empty() {
        cfg.profile_ids()
    } else {
        args.profiles.into_iter().map(ProfileId::new).collect()
    };

    let mut statuses = Vec::with_capacity(profiles.len());
    for id in &profiles {
        let controller = gateway.tunnel(id);
        let interface = id.interface_name();
        statuses.push(TunnelStatus {
            profile: id.to_string(),
            unit: controller.service_unit().to_owned(),
            table: table_name(&interface),
            interface,
            active: controller.status().await,
        });
    }

    let rendered = output::render_list(
        global.output,
        &statuses,
        |s| StatusRow::from(s),
        |s| format!("{}\t{}", s.profile, if s.active { "active" } else { "inactive" }),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
