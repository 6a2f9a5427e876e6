//! `tungate run`: bring tunnels up, enable their devices, keep both in
//! sync until interrupted.

use serde::Serialize;
use tabled::Tabled;
use tracing::{info, warn};

use tungate_config::Config;
use tungate_core::{Gateway, ProfileId, TunnelController};

use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct DeviceResult {
    profile: String,
    mac: String,
    outcome: String,
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Profile")]
    profile: String,
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

impl From<&DeviceResult> for DeviceRow {
    fn from(r: &DeviceResult) -> Self {
        Self {
            profile: r.profile.clone(),
            mac: r.mac.clone(),
            outcome: r.outcome.clone(),
        }
    }
}

fn progress(global: &GlobalOpts, ok: bool, message: &str) {
    if !global.quiet {
        eprintln!("{}", output::status_line(global, ok, message));
    }
}

pub async fn handle(
    gateway: &Gateway,
    cfg: &Config,
    args: RunArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let profiles: Vec<ProfileId> = if args.profiles.is_empty() {
        cfg.autostart_profiles()
    } else {
        args.profiles.into_iter().map(ProfileId::new).collect()
    };
    if profiles.is_empty() {
        return Err(CliError::NoTunnels);
    }

    // ── Bring tunnels up ────────────────────────────────────────────
    let mut started: Vec<TunnelController> = Vec::new();
    let mut first_failure: Option<CliError> = None;
    let mut devices = Vec::new();

    // A failing profile must not strand the tunnels already up, so
    // failures are recorded and the loop moves on.
    for id in &profiles {
        let controller = gateway.tunnel(id);
        let up = match controller.setup().await {
            Ok(()) => controller.start().await,
            Err(e) => Err(e),
        };
        match up {
            Ok(true) => {}
            Ok(false) => {
                progress(global, false, &format!("{id} did not come up"));
                first_failure.get_or_insert(CliError::TunnelFailed {
                    profile: id.to_string(),
                    unit: controller.service_unit().to_owned(),
                });
                continue;
            }
            Err(e) => {
                progress(global, false, &format!("{id}: {e}"));
                first_failure.get_or_insert(CliError::from(e));
                continue;
            }
        }
        let remote = controller
            .profile()
            .await
            .remote_gateway
            .map_or_else(|| "-".to_owned(), |ip| ip.to_string());
        progress(global, true, &format!("{id} established via {remote}"));

        let entry = cfg.tunnel(id);
        if entry.is_some_and(|t| t.autostart) {
            if let Err(e) = controller.enable_service().await {
                warn!(profile = %id, error = %e, "could not enable tunnel service at boot");
            }
        }
        for device in entry.map(|t| t.devices.as_slice()).unwrap_or_default() {
            let mac = device.mac();
            let outcome = match gateway.enable_device(&mac, device.mode(), id).await {
                Ok(outcome) => outcome.to_string(),
                Err(e) => {
                    warn!(profile = %id, mac = %mac, error = %e, "device enable failed");
                    format!("error: {e}")
                }
            };
            devices.push(DeviceResult {
                profile: id.to_string(),
                mac: mac.to_string(),
                outcome,
            });
        }
        started.push(controller);
    }

    if started.is_empty() {
        if let Some(err) = first_failure {
            return Err(err);
        }
    }

    // ── Keep in sync ────────────────────────────────────────────────
    gateway.start_reconciler().await;
    let waited = if args.once {
        let summary = gateway.access().reconcile_once().await;
        info!(?summary, "reconciliation pass complete");
        Ok(())
    } else {
        info!(tunnels = started.len(), "running; press ctrl-c to stop");
        tokio::signal::ctrl_c().await
    };

    // ── Tear down ───────────────────────────────────────────────────
    gateway.shutdown().await;
    for controller in &started {
        controller.stop().await;
    }
    waited?;

    let rendered = output::render_list(
        global.output,
        &devices,
        |r| DeviceRow::from(r),
        |r| format!("{}\t{}", r.mac, r.outcome),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
