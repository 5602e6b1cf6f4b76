//! Shard recovery orchestration.
//!
//! When a node `Sa` dies, the coordinator spawns a same-identity
//! replacement `Saa` and re-synchronizes it from both surviving copies:
//!
//! 1. `Sb`, `Sa`'s ring successor, receives `UPDATE_PRIMARY`: it adopts
//!    the failed range out of its replica and refills `Saa`'s primary
//!    shard.
//! 2. `Sc`, `Sa`'s ring predecessor, receives `UPDATE_SECONDARY`: it
//!    re-points its replication at `Saa` and refills `Saa`'s replica
//!    slot from its primary shard.
//! 3. When both have acknowledged, client puts for the range are
//!    quiesced, `Sb` flushes in-flight writes (`SWITCH_PRIMARY`), `Saa`
//!    gets its own replication connection (`SET_SECONDARY`), and the
//!    range resumes with `Saa` as primary.
//!
//! The two acks can arrive in either order; the second one triggers the
//! switch. Acks for a node not under reconstruction are dropped. A failed
//! recovery is retried once before the shard is written off.

use tracing::{debug, error, info, warn};

use crate::net::messages::{CtrlCommand, CtrlRequest, CtrlStatus, Report, ReportKind};
use crate::sharding::{primary_server_id, secondary_server_id};

use super::registry::NodeStatus;
use super::{spawn, Coordinator, Error};

const MAX_ATTEMPTS: u32 = 2;

/// Send a node the locator of its ring successor so it can open its
/// outbound replication connection.
pub(super) async fn send_set_secondary(
    coordinator: &Coordinator,
    sid: usize,
) -> Result<(), Error> {
    let secondary = coordinator.node(secondary_server_id(sid, coordinator.num_servers()));
    let request = CtrlRequest::set_secondary(secondary.addr.peer_locator());

    let status = coordinator.node(sid).send_ctrl(&request).await?;

    if status != CtrlStatus::Success {
        return Err(Error::CtrlRejected(sid, CtrlCommand::SetSecondary));
    }

    Ok(())
}

/// Reconstruct a failed node end to end. Runs as its own task; the tail
/// of the protocol is driven by the ack handlers.
pub(super) async fn recover(coordinator: Coordinator, sid: usize) {
    // One recovery at a time cluster-wide.
    let _serial = coordinator.recovery_lock().await;

    let attempts = {
        let mut runtime = coordinator.node(sid).runtime();
        runtime.recovery_attempts += 1;
        runtime.recovery_attempts
    };

    if attempts > MAX_ATTEMPTS {
        error!(
            "node {} failed recovery {} times, leaving its shard unreplicated",
            sid, MAX_ATTEMPTS
        );
        return;
    }

    if let Err(err) = reconstruct(&coordinator, sid).await {
        error!("recovery of node {} failed: {}", sid, err);
        retry(&coordinator, sid);
    }
}

async fn reconstruct(coordinator: &Coordinator, sid: usize) -> Result<(), Error> {
    {
        let mut runtime = coordinator.node(sid).runtime();
        runtime.status = NodeStatus::Recon;
        runtime.last_heartbeat = None;
        runtime.updated_primary_ack = false;
        runtime.updated_secondary_ack = false;
        runtime.quiesce_puts = false;
        runtime.switch_started = false;
    }

    spawn::spawn_server(coordinator, sid).await?;

    let n = coordinator.num_servers();
    let replacement = coordinator.node(sid).addr.peer_locator();

    // The failed node's secondary adopts its range and refills the
    // replacement's primary shard.
    let sb = secondary_server_id(sid, n);
    let status = coordinator
        .node(sb)
        .send_ctrl(&CtrlRequest::update_primary(replacement.clone()))
        .await?;
    if status != CtrlStatus::Success {
        return Err(Error::CtrlRejected(sb, CtrlCommand::UpdatePrimary));
    }

    // The node that replicated through the failed one refills the
    // replacement's replica slot.
    let sc = primary_server_id(sid, n);
    let status = coordinator
        .node(sc)
        .send_ctrl(&CtrlRequest::update_secondary(replacement))
        .await?;
    if status != CtrlStatus::Success {
        return Err(Error::CtrlRejected(sc, CtrlCommand::UpdateSecondary));
    }

    info!("node {} reconstruction in progress", sid);

    // Continues in handle_report when both acks arrive.
    Ok(())
}

/// Node → coordinator traffic: heartbeats and recovery acknowledgments.
pub(super) async fn handle_report(coordinator: &Coordinator, report: &Report) {
    let n = coordinator.num_servers();
    let sid = report.server_id as usize;

    if sid >= n {
        warn!("report from unknown node {}", sid);
        return;
    }

    match report.kind {
        ReportKind::Heartbeat => coordinator.node(sid).heartbeat(),

        // From Sb: the replacement's primary shard is caught up.
        ReportKind::UpdatedPrimary => {
            ack(coordinator, primary_server_id(sid, n), Ack::Primary).await;
        }

        // From Sc: the replacement's replica slot is caught up.
        ReportKind::UpdatedSecondary => {
            ack(coordinator, secondary_server_id(sid, n), Ack::Secondary).await;
        }

        ReportKind::UpdatePrimaryFailed => {
            warn!("node {} reported a failed primary catch-up push", sid);
            push_failed(coordinator, primary_server_id(sid, n));
        }

        ReportKind::UpdateSecondaryFailed => {
            warn!("node {} reported a failed replica catch-up push", sid);
            push_failed(coordinator, secondary_server_id(sid, n));
        }
    }
}

enum Ack {
    Primary,
    Secondary,
}

async fn ack(coordinator: &Coordinator, saa: usize, ack: Ack) {
    let switch_now = {
        let mut runtime = coordinator.node(saa).runtime();

        if runtime.status != NodeStatus::Recon {
            debug!("dropping stray recovery ack for node {}", saa);
            return;
        }

        match ack {
            Ack::Primary => runtime.updated_primary_ack = true,
            Ack::Secondary => runtime.updated_secondary_ack = true,
        }

        if runtime.updated_primary_ack
            && runtime.updated_secondary_ack
            && !runtime.switch_started
        {
            runtime.switch_started = true;
            true
        } else {
            false
        }
    };

    if switch_now {
        if let Err(err) = switch_primary(coordinator, saa).await {
            error!("primary switch for node {} failed: {}", saa, err);
            retry(coordinator, saa);
        }
    }
}

/// Both copies are caught up: quiesce the range, have the acting primary
/// flush, re-bind the replacement's replication, resume.
async fn switch_primary(coordinator: &Coordinator, saa: usize) -> Result<(), Error> {
    let sb = secondary_server_id(saa, coordinator.num_servers());

    coordinator.node(saa).runtime().quiesce_puts = true;
    coordinator.node(sb).runtime().quiesce_puts = true;

    let result = finish_switch(coordinator, saa, sb).await;

    coordinator.node(saa).runtime().quiesce_puts = false;
    coordinator.node(sb).runtime().quiesce_puts = false;

    if result.is_ok() {
        let mut runtime = coordinator.node(saa).runtime();
        runtime.status = NodeStatus::Online;
        runtime.recovery_attempts = 0;
        drop(runtime);

        info!("node {} recovered", saa);
    }

    result
}

async fn finish_switch(coordinator: &Coordinator, saa: usize, sb: usize) -> Result<(), Error> {
    let status = coordinator
        .node(sb)
        .send_ctrl(&CtrlRequest::switch_primary())
        .await?;
    if status != CtrlStatus::Success {
        return Err(Error::CtrlRejected(sb, CtrlCommand::SwitchPrimary));
    }

    send_set_secondary(coordinator, saa).await?;

    Ok(())
}

/// A catch-up push died mid-stream. Only meaningful while the target is
/// under reconstruction; anything else is a stray report.
fn push_failed(coordinator: &Coordinator, saa: usize) {
    if coordinator.node(saa).status() != NodeStatus::Recon {
        debug!("dropping stray push failure for node {}", saa);
        return;
    }

    retry(coordinator, saa);
}

fn retry(coordinator: &Coordinator, saa: usize) {
    coordinator.node(saa).runtime().status = NodeStatus::Failed;

    let task = coordinator.clone();
    coordinator.spawn(async move {
        recover(task, saa).await;
    });
}
