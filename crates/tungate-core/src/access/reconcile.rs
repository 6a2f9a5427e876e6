use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::AccessController;

/// Reconcile enabled devices every `period` until cancelled.
pub(super) async fn reconcile_task(
    controller: Arc<AccessController>,
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
                // Per-device failures are logged inside the pass.
                controller.reconcile_once().await;
            }
        }
    }
    debug!("access reconciler stopped");
}
