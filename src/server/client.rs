//! Client-facing worker.
//!
//! Connections are one-shot: a single operation request, a single reply.
//! PUT handling installs the value and forwards it to the replica inside
//! one per-key critical section, so the replica sees the primary's write
//! order. While the node is switching its primary role away, new client
//! requests are refused outright.

use tokio::net::TcpListener;
use tokio::select;
use tracing::{debug, error, warn};

use crate::net::messages::{
    FromBytes, MessageCode, OpCode, OperationRequest, OperationResponse, Status,
};
use crate::net::Stream;
use crate::sharding::secondary_server_id;

use super::{peer, Node, NodeState};

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
                    warn!("client accept failed: {} [{}]", err, node.id());
                }
            },

            _ = node.cancelled() => break,
        }
    }
}

async fn handle(node: Node, mut stream: Stream) {
    let request = match stream.recv().await {
        Ok(message) => match message
            .require(MessageCode::OperationRequest)
            .and_then(OperationRequest::from_bytes)
        {
            Ok(request) => request,
            Err(err) => {
                debug!("bad client message: {} [{}]", err, node.id());
                return;
            }
        },
        Err(err) => {
            debug!("client read failed: {} [{}]", err, node.id());
            return;
        }
    };

    let response = serve(&node, &request).await;
    let _ = stream.send(&response).await;
}

/// Serve one client operation.
pub(super) async fn serve(node: &Node, request: &OperationRequest) -> OperationResponse {
    if node.state() == NodeState::SwitchingPrimary {
        return OperationResponse::status(Status::ServerFailure);
    }

    // Held until the reply is on its way; the switch-primary flush waits
    // for every one of these.
    let _gate = node.gate_read().await;

    if node.state() == NodeState::SwitchingPrimary {
        return OperationResponse::status(Status::ServerFailure);
    }

    let key_sid = request.key.server_id(node.num_servers());

    // While the predecessor's range is ours, its keys resolve to our
    // replica of that range.
    let acting_primary = node.state() == NodeState::UpdatingPrimary
        && secondary_server_id(key_sid, node.num_servers()) == node.id();

    if key_sid != node.id() && !acting_primary {
        warn!(
            "client request for key {} owned by node {} [{}]",
            request.key,
            key_sid,
            node.id()
        );
        return OperationResponse::status(Status::ServerFailure);
    }

    let store = if acting_primary {
        node.secondary_store()
    } else {
        node.primary_store()
    };

    match request.op {
        OpCode::Noop => OperationResponse::status(Status::Success),

        OpCode::Get => match store.get(&request.key).await {
            Some(value) => OperationResponse::value(value),
            None => {
                debug!("key {} not found [{}]", request.key, node.id());
                OperationResponse::status(Status::KeyNotFound)
            }
        },

        OpCode::Put => {
            let mut guard = store.lock(request.key).await;

            if guard.put(request.value.clone()).is_err() {
                warn!("out of space [{}]", node.id());
                return OperationResponse::status(Status::OutOfSpace);
            }

            let slot = if acting_primary {
                node.primary_out()
            } else {
                node.secondary_out()
            };

            match peer::forward(slot, request).await {
                Ok(()) => OperationResponse::status(Status::Success),
                Err(err) => {
                    error!("put forwarding failed: {} [{}]", err, node.id());
                    OperationResponse::status(Status::ServerFailure)
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::server::NodeOptions;
    use bytes::Bytes;

    // Bound but never run: serve() is driven directly.
    async fn test_node(server_id: usize) -> Node {
        Node::bind(NodeOptions {
            coordinator_host: "127.0.0.1".into(),
            coordinator_port: 1,
            client_port: 0,
            peer_port: 0,
            control_port: 0,
            server_id,
            num_servers: 3,
        })
        .await
        .unwrap()
    }

    fn key_owned_by(sid: usize, num_servers: usize) -> crate::sharding::Key {
        key_tagged(sid, num_servers, 0)
    }

    fn key_tagged(sid: usize, num_servers: usize, tag: u8) -> crate::sharding::Key {
        use crate::sharding::{Key, KEY_SIZE};

        let mut bytes = [0u8; KEY_SIZE];
        bytes[KEY_SIZE - 1] = tag;
        for counter in 0..u32::MAX {
            bytes[..4].copy_from_slice(&counter.to_be_bytes());
            let key = Key::new(bytes);
            if key.server_id(num_servers) == sid {
                return key;
            }
        }
        unreachable!();
    }

    #[tokio::test]
    async fn test_serve_routing() {
        let node = test_node(1).await;

        // Keys we own: stored, no replica wired so no forwarding happens.
        let ours = key_owned_by(1, 3);
        let response = serve(&node, &OperationRequest::put(ours, Bytes::from_static(b"v"))).await;
        assert_eq!(response.status, Status::Success);

        let response = serve(&node, &OperationRequest::get(ours)).await;
        assert_eq!(&response.value[..], b"v");

        // Keys we don't own: refused.
        let theirs = key_owned_by(2, 3);
        let response = serve(&node, &OperationRequest::get(theirs)).await;
        assert_eq!(response.status, Status::ServerFailure);

        // Missing key.
        let missing = key_tagged(1, 3, 1);
        let response = serve(&node, &OperationRequest::get(missing)).await;
        assert_eq!(response.status, Status::KeyNotFound);
    }

    #[tokio::test]
    async fn test_acting_primary_uses_replica() {
        let node = test_node(1).await;

        // Node 0 failed; we adopt its range.
        node.set_state(NodeState::UpdatingPrimary);

        let failed_range = key_owned_by(0, 3);
        let response = serve(
            &node,
            &OperationRequest::put(failed_range, Bytes::from_static(b"adopted")),
        )
        .await;
        assert_eq!(response.status, Status::Success);

        // The write landed in the replica shard, not the primary.
        assert!(node.primary_store().is_empty());
        assert_eq!(
            node.secondary_store().get(&failed_range).await.unwrap(),
            &b"adopted"[..]
        );

        // Reads resolve there too.
        let response = serve(&node, &OperationRequest::get(failed_range)).await;
        assert_eq!(&response.value[..], b"adopted");
    }

    #[tokio::test]
    async fn test_switching_refuses_clients() {
        let node = test_node(1).await;
        node.set_state(NodeState::SwitchingPrimary);

        let ours = key_owned_by(1, 3);
        let response = serve(&node, &OperationRequest::get(ours)).await;
        assert_eq!(response.status, Status::ServerFailure);
    }
}
