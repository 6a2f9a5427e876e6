use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::TunnelController;

/// Re-check the tunnel's remote endpoint every `period` until cancelled.
///
/// A failed pass is logged and the loop carries on; the next tick retries.
pub(super) async fn route_refresh_task(
    controller: TunnelController,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = controller.refresh_routes().await {
                    warn!(error = %e, "tunnel route refresh failed");
                }
            }
        }
    }
}
