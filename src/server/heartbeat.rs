//! Liveness beacon.
//!
//! One heartbeat per second to the coordinator over the registration
//! connection. Send failures are logged and retried on the next tick;
//! the coordinator's sweep decides when we are dead, not us.

use std::time::Duration;

use tokio::select;
use tokio::time::interval;
use tracing::debug;

use crate::net::messages::ReportKind;

use super::Node;

pub(super) const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

pub(super) async fn run(node: Node) {
    let mut tick = interval(HEARTBEAT_INTERVAL);

    loop {
        select! {
            _ = tick.tick() => {
                if let Err(err) = node.report(ReportKind::Heartbeat).await {
                    debug!("heartbeat send failed: {} [{}]", err, node.id());
                }
            }

            _ = node.cancelled() => break,
        }
    }
}
