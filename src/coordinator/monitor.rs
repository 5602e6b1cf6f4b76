//! Failure detector.
//!
//! Sweeps the heartbeat timestamps once a second. A node that was online
//! but has been silent past the configured timeout is marked failed and a
//! recovery task is kicked off for it. Nodes already failed or under
//! reconstruction are left to the recovery path.

use std::time::Duration;

use tokio::select;
use tokio::time::interval;
use tracing::warn;

use super::recovery;
use super::registry::NodeStatus;
use super::Coordinator;

static SWEEP: Duration = Duration::from_secs(1);

pub(super) async fn run(coordinator: Coordinator) {
    let mut tick = interval(SWEEP);

    loop {
        select! {
            _ = tick.tick() => sweep(&coordinator),
            _ = coordinator.cancelled() => break,
        }
    }
}

pub(super) fn sweep(coordinator: &Coordinator) {
    for record in coordinator.registry().nodes() {
        let timed_out = {
            let runtime = record.runtime();
            runtime.status == NodeStatus::Online
                && matches!(
                    runtime.last_heartbeat,
                    Some(at) if at.elapsed() > coordinator.heartbeat_timeout()
                )
        };

        if timed_out {
            warn!("node {} heartbeat check failed", record.id);
            record.runtime().status = NodeStatus::Failed;

            let task = coordinator.clone();
            let sid = record.id;
            coordinator.spawn(async move {
                recovery::recover(task, sid).await;
            });
        }
    }
}
