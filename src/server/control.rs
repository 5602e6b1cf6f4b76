//! Coordinator control channel.
//!
//! The coordinator dials our control port and issues requests one at a
//! time: the secondary handshake at startup, the recovery roles, the
//! primary switch, and shutdown. Each request is acknowledged except
//! shutdown, which just tears the node down.

use tokio::net::TcpListener;
use tokio::select;
use tracing::{debug, error, info, warn};

use crate::net::messages::{
    CtrlCommand, CtrlRequest, CtrlResponse, FromBytes, Locator, MessageCode, ReportKind,
};
use crate::net::Stream;

use super::{replicate, Node, NodeState};

pub(super) async fn run(node: Node, listener: TcpListener) {
    loop {
        select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, _)) => {
                    let node = node.clone();
                    node.clone().spawn(async move {
                        select! {
                            _ = handle(node.clone(), Stream::new(socket)) => (),
                            _ = node.cancelled() => (),
                        }
                    });
                }
                Err(err) => {
                    warn!("control accept failed: {} [{}]", err, node.id());
                }
            },

            _ = node.cancelled() => break,
        }
    }
}

async fn handle(node: Node, mut stream: Stream) {
    loop {
        let request = match stream.recv().await {
            Ok(message) => match message
                .require(MessageCode::CtrlRequest)
                .and_then(CtrlRequest::from_bytes)
            {
                Ok(request) => request,
                Err(err) => {
                    warn!("bad control message: {} [{}]", err, node.id());
                    return;
                }
            },
            Err(err) => {
                debug!("control channel closed: {} [{}]", err, node.id());
                return;
            }
        };

        if request.command == CtrlCommand::Shutdown {
            info!("shutdown requested [{}]", node.id());
            node.shutdown();
            return;
        }

        let response = dispatch(&node, &request).await;

        if stream.send(&response).await.is_err() {
            return;
        }
    }
}

pub(super) async fn dispatch(node: &Node, request: &CtrlRequest) -> CtrlResponse {
    match request.command {
        CtrlCommand::SetSecondary => set_secondary(node, request.locator.as_ref()).await,
        CtrlCommand::UpdatePrimary => update_primary(node, request.locator.as_ref()).await,
        CtrlCommand::UpdateSecondary => update_secondary(node, request.locator.as_ref()).await,
        CtrlCommand::SwitchPrimary => switch_primary(node).await,
        // Handled before dispatch.
        CtrlCommand::Shutdown => CtrlResponse::success(),
    }
}

/// Open (or re-open) the outbound replication connection.
async fn set_secondary(node: &Node, locator: Option<&Locator>) -> CtrlResponse {
    let Some(locator) = locator else {
        return CtrlResponse::failure();
    };

    match Stream::connect(&locator.host, locator.port).await {
        Ok(stream) => {
            *node.secondary_out().lock().await = Some(stream);
            info!(
                "replicating to {}:{} [{}]",
                locator.host,
                locator.port,
                node.id()
            );
            CtrlResponse::success()
        }
        Err(err) => {
            error!("set secondary failed: {} [{}]", err, node.id());
            CtrlResponse::failure()
        }
    }
}

/// We were the failed node's secondary: adopt its range and refill the
/// replacement's primary shard from our replica.
async fn update_primary(node: &Node, locator: Option<&Locator>) -> CtrlResponse {
    let Some(locator) = locator else {
        return CtrlResponse::failure();
    };

    // Forwarding connection for client writes we absorb on its behalf.
    // A connect failure is carried by the control response itself.
    let stream = match Stream::connect(&locator.host, locator.port).await {
        Ok(stream) => stream,
        Err(err) => {
            error!("cannot reach replacement: {} [{}]", err, node.id());
            return CtrlResponse::failure();
        }
    };

    *node.primary_out().lock().await = Some(stream);
    node.set_state(NodeState::UpdatingPrimary);

    info!(
        "acting as primary for node {}'s range [{}]",
        node.primary_sid(),
        node.id()
    );

    let task = node.clone();
    let locator = locator.clone();
    node.spawn(async move {
        match replicate::push_shard(task.secondary_store(), &locator.host, locator.port).await {
            Ok(pushed) => {
                info!(
                    "replacement primary refilled, {} pairs [{}]",
                    pushed,
                    task.id()
                );
                // Stay in UpdatingPrimary until the switch: we keep
                // absorbing client writes for the failed range.
                report(&task, ReportKind::UpdatedPrimary).await;
            }
            Err(err) => {
                error!("primary catch-up push failed: {} [{}]", err, task.id());
                task.set_state(NodeState::Online);
                report(&task, ReportKind::UpdatePrimaryFailed).await;
            }
        }
    });

    CtrlResponse::success()
}

/// The failed node replicated our primary shard: re-point replication at
/// the replacement and refill its replica slot.
async fn update_secondary(node: &Node, locator: Option<&Locator>) -> CtrlResponse {
    let Some(locator) = locator else {
        return CtrlResponse::failure();
    };

    let stream = match Stream::connect(&locator.host, locator.port).await {
        Ok(stream) => stream,
        Err(err) => {
            error!("cannot reach replacement: {} [{}]", err, node.id());
            return CtrlResponse::failure();
        }
    };

    *node.secondary_out().lock().await = Some(stream);
    node.set_state(NodeState::UpdatingSecondary);

    let task = node.clone();
    let locator = locator.clone();
    node.spawn(async move {
        match replicate::push_shard(task.primary_store(), &locator.host, locator.port).await {
            Ok(pushed) => {
                info!(
                    "replacement replica refilled, {} pairs [{}]",
                    pushed,
                    task.id()
                );
                task.set_state(NodeState::Online);
                report(&task, ReportKind::UpdatedSecondary).await;
            }
            Err(err) => {
                error!("replica catch-up push failed: {} [{}]", err, task.id());
                task.set_state(NodeState::Online);
                report(&task, ReportKind::UpdateSecondaryFailed).await;
            }
        }
    });

    CtrlResponse::success()
}

/// Stop taking client traffic for the adopted range and drain writes
/// already accepted; once acknowledged, the replacement owns the range.
async fn switch_primary(node: &Node) -> CtrlResponse {
    node.set_state(NodeState::SwitchingPrimary);

    // Every client write that passed the state check holds the read half;
    // taking the write half means they have all replicated and replied.
    drop(node.gate_write().await);

    node.set_state(NodeState::Online);
    info!("primary switch complete [{}]", node.id());

    CtrlResponse::success()
}

async fn report(node: &Node, kind: ReportKind) {
    if let Err(err) = node.report(kind).await {
        error!("report {:?} failed: {} [{}]", kind, err, node.id());
    }
}
