//! Replication-ring traffic.
//!
//! Inbound: forwarded writes from the node we replicate, catch-up streams
//! during recovery, and replica reads. A connection serves requests until
//! it closes or a NOOP marks the end of a catch-up stream.
//!
//! Outbound: [`forward`] pushes one PUT over a standing peer connection
//! and waits for the reply, holding the connection for the duration of
//! the exchange.

use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::net::messages::{
    FromBytes, MessageCode, OpCode, OperationRequest, OperationResponse, Status,
};
use crate::net::{Error as NetError, Stream};
use crate::sharding::secondary_server_id;

use super::{Error, Node};

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
                    warn!("peer accept failed: {} [{}]", err, node.id());
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
                .require(MessageCode::OperationRequest)
                .and_then(OperationRequest::from_bytes)
            {
                Ok(request) => request,
                Err(err) => {
                    debug!("bad peer message: {} [{}]", err, node.id());
                    return;
                }
            },
            Err(NetError::Eof) => return,
            Err(err) => {
                debug!("peer read failed: {} [{}]", err, node.id());
                return;
            }
        };

        // End-of-stream sentinel on a catch-up push; no reply.
        if request.op == OpCode::Noop {
            debug!("catch-up stream complete [{}]", node.id());
            return;
        }

        let response = serve(&node, &request).await;

        if stream.send(&response).await.is_err() {
            return;
        }
    }
}

/// Serve one request from a ring peer.
pub(super) async fn serve(node: &Node, request: &OperationRequest) -> OperationResponse {
    let key_sid = request.key.server_id(node.num_servers());

    // Our own range lands in the primary shard (catch-up into a
    // replacement, or writes relayed by the acting primary); the
    // predecessor's range lands in our replica of it.
    let store = if key_sid == node.id() {
        node.primary_store()
    } else if secondary_server_id(key_sid, node.num_servers()) == node.id() {
        node.secondary_store()
    } else {
        warn!(
            "peer message for key {} not replicated here [{}]",
            request.key,
            node.id()
        );
        return OperationResponse::status(Status::ServerFailure);
    };

    match request.op {
        OpCode::Noop => OperationResponse::status(Status::Success),

        OpCode::Get => match store.get(&request.key).await {
            Some(value) => OperationResponse::value(value),
            None => OperationResponse::status(Status::KeyNotFound),
        },

        OpCode::Put => match store.put(request.key, request.value.clone()).await {
            Ok(_) => OperationResponse::status(Status::Success),
            Err(err) => {
                warn!("peer put failed: {} [{}]", err, node.id());
                OperationResponse::status(Status::OutOfSpace)
            }
        },
    }
}

/// Synchronously replicate one PUT over a standing peer connection. A
/// missing connection means no replica is wired yet and the write stays
/// local.
pub(super) async fn forward(
    slot: &Mutex<Option<Stream>>,
    request: &OperationRequest,
) -> Result<(), Error> {
    let mut slot = slot.lock().await;

    let Some(stream) = slot.as_mut() else {
        return Ok(());
    };

    stream.send(request).await?;

    let payload = stream.recv_require(MessageCode::OperationResponse).await?;
    let response = OperationResponse::from_bytes(payload)?;

    if response.status != Status::Success {
        return Err(Error::ForwardFailed(response.status));
    }

    Ok(())
}
