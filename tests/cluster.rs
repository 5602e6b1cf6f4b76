//! End-to-end protocol tests: several in-process nodes on ephemeral
//! ports, with the test acting as a scripted coordinator over real
//! sockets.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use ringkv::net::messages::{
    CtrlRequest, CtrlResponse, FromBytes, Locator, MessageCode, OperationRequest,
    OperationResponse, Report, ReportKind, Status,
};
use ringkv::net::Stream;
use ringkv::server::{Node, NodeOptions};
use ringkv::sharding::{Key, KEY_SIZE};
use ringkv::util::random_string;

struct FakeCoordinator {
    port: u16,
    reports: mpsc::UnboundedReceiver<Report>,
}

impl FakeCoordinator {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, reports) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut stream = Stream::new(socket);
                    while let Ok(message) = stream.recv().await {
                        let Ok(payload) = message.require(MessageCode::Report) else {
                            return;
                        };
                        let Ok(report) = Report::from_bytes(payload) else {
                            return;
                        };
                        if tx.send(report).is_err() {
                            return;
                        }
                    }
                });
            }
        });

        Self { port, reports }
    }

    /// Wait for a specific report, skipping heartbeats and anything else.
    async fn await_report(&mut self, kind: ReportKind, server_id: usize) {
        loop {
            let report = timeout(Duration::from_secs(10), self.reports.recv())
                .await
                .expect("timed out waiting for report")
                .expect("report channel closed");

            if report.kind == kind && report.server_id as usize == server_id {
                return;
            }
        }
    }
}

async fn boot_node(coordinator_port: u16, server_id: usize, num_servers: usize) -> Node {
    let node = Node::bind(NodeOptions {
        coordinator_host: "127.0.0.1".into(),
        coordinator_port,
        client_port: 0,
        peer_port: 0,
        control_port: 0,
        server_id,
        num_servers,
    })
    .await
    .unwrap();

    node.run().await.unwrap();
    node
}

fn locator(node: &Node) -> Locator {
    Locator {
        host: "127.0.0.1".into(),
        port: node.peer_port(),
    }
}

async fn ctrl(node: &Node, request: &CtrlRequest) -> CtrlResponse {
    let mut stream = Stream::connect("127.0.0.1", node.control_port())
        .await
        .unwrap();
    stream.send(request).await.unwrap();

    let payload = stream
        .recv_require(MessageCode::CtrlResponse)
        .await
        .unwrap();
    CtrlResponse::from_bytes(payload).unwrap()
}

/// Boot `n` nodes and wire the replication ring the way the coordinator
/// does at startup.
async fn boot_cluster(coordinator_port: u16, n: usize) -> Vec<Node> {
    let mut nodes = Vec::new();
    for id in 0..n {
        nodes.push(boot_node(coordinator_port, id, n).await);
    }

    for (id, node) in nodes.iter().enumerate() {
        let secondary = &nodes[(id + 1) % n];
        assert!(ctrl(node, &CtrlRequest::set_secondary(locator(secondary)))
            .await
            .ok());
    }

    nodes
}

async fn request(port: u16, request: &OperationRequest) -> OperationResponse {
    let mut stream = Stream::connect("127.0.0.1", port).await.unwrap();
    stream.send(request).await.unwrap();

    let payload = stream
        .recv_require(MessageCode::OperationResponse)
        .await
        .unwrap();
    OperationResponse::from_bytes(payload).unwrap()
}

/// A key in the given node's range, parameterized so tests can mint as
/// many distinct keys per range as they need.
fn key_owned_by(sid: usize, num_servers: usize, tag: u8) -> Key {
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
async fn test_put_get_replicates() {
    let mut coordinator = FakeCoordinator::start().await;
    let nodes = boot_cluster(coordinator.port, 3).await;

    let key = key_owned_by(0, 3, 0);

    let response = request(
        nodes[0].client_port(),
        &OperationRequest::put(key, Bytes::from_static(b"hello")),
    )
    .await;
    assert_eq!(response.status, Status::Success);

    // Read back from the primary.
    let response = request(nodes[0].client_port(), &OperationRequest::get(key)).await;
    assert_eq!(response.status, Status::Success);
    assert_eq!(&response.value[..], b"hello");

    // The replica on the ring successor has it too (peer read, bypassing
    // the redirect).
    let response = request(nodes[1].peer_port(), &OperationRequest::get(key)).await;
    assert_eq!(response.status, Status::Success);
    assert_eq!(&response.value[..], b"hello");

    // Overwrites replicate in order; the last write wins on both copies.
    let mut last = Bytes::new();
    for _ in 0..3 {
        last = Bytes::from(random_string(64));
        let response = request(
            nodes[0].client_port(),
            &OperationRequest::put(key, last.clone()),
        )
        .await;
        assert_eq!(response.status, Status::Success);
    }

    let primary = request(nodes[0].client_port(), &OperationRequest::get(key)).await;
    let replica = request(nodes[1].peer_port(), &OperationRequest::get(key)).await;
    assert_eq!(primary.value, last);
    assert_eq!(replica.value, last);

    coordinator.await_report(ReportKind::Heartbeat, 0).await;
}

#[tokio::test]
async fn test_routing_rejected() {
    let coordinator = FakeCoordinator::start().await;
    let nodes = boot_cluster(coordinator.port, 3).await;

    // A key from node 0's range presented to node 1's client port.
    let key = key_owned_by(0, 3, 0);
    let response = request(
        nodes[1].client_port(),
        &OperationRequest::put(key, Bytes::from_static(b"nope")),
    )
    .await;
    assert_eq!(response.status, Status::ServerFailure);

    // Peers only accept keys they hold a copy of: node 0 is neither
    // primary nor secondary for node 1's range.
    let key = key_owned_by(1, 3, 0);
    let response = request(nodes[0].peer_port(), &OperationRequest::get(key)).await;
    assert_eq!(response.status, Status::ServerFailure);
}

#[tokio::test]
async fn test_missing_key() {
    let coordinator = FakeCoordinator::start().await;
    let nodes = boot_cluster(coordinator.port, 3).await;

    let key = key_owned_by(2, 3, 0);
    let response = request(nodes[2].client_port(), &OperationRequest::get(key)).await;
    assert_eq!(response.status, Status::KeyNotFound);
}

#[tokio::test]
async fn test_malformed_frame_keeps_node_alive() {
    let coordinator = FakeCoordinator::start().await;
    let nodes = boot_cluster(coordinator.port, 3).await;

    // A frame with a bogus code: the node closes the connection.
    let mut raw = TcpStream::connect(("127.0.0.1", nodes[0].client_port()))
        .await
        .unwrap();
    raw.write_all(&[99u8, 0, 5, 1, 2]).await.unwrap();
    raw.flush().await.unwrap();

    let mut buffer = [0u8; 16];
    let read = timeout(Duration::from_secs(5), raw.read(&mut buffer))
        .await
        .expect("node did not close the connection");
    assert!(matches!(read, Ok(0) | Err(_)));

    // The node keeps serving.
    let key = key_owned_by(0, 3, 0);
    let response = request(
        nodes[0].client_port(),
        &OperationRequest::put(key, Bytes::from_static(b"still here")),
    )
    .await;
    assert_eq!(response.status, Status::Success);
}

#[tokio::test]
async fn test_recovery_catchup_and_switch() {
    let mut coordinator = FakeCoordinator::start().await;
    let nodes = boot_cluster(coordinator.port, 3).await;

    // Seed node 0's range, plus some of node 2's range (whose replica
    // lived on node 0 and must be rebuilt too).
    for tag in 0..20u8 {
        let key = key_owned_by(0, 3, tag);
        let response = request(
            nodes[0].client_port(),
            &OperationRequest::put(key, Bytes::copy_from_slice(&[tag])),
        )
        .await;
        assert_eq!(response.status, Status::Success);
    }
    for tag in 0..5u8 {
        let key = key_owned_by(2, 3, tag);
        let response = request(
            nodes[2].client_port(),
            &OperationRequest::put(key, Bytes::copy_from_slice(&[0xf0 | tag])),
        )
        .await;
        assert_eq!(response.status, Status::Success);
    }

    // Node 0 dies; a fresh replacement comes up with the same identity.
    nodes[0].shutdown();
    let replacement = boot_node(coordinator.port, 0, 3).await;

    // Sb (node 1) adopts the range and refills the replacement's primary.
    assert!(
        ctrl(&nodes[1], &CtrlRequest::update_primary(locator(&replacement)))
            .await
            .ok()
    );

    // Client writes for the failed range keep landing while the catch-up
    // runs, served by the acting primary.
    let during = key_owned_by(0, 3, 77);
    let response = request(
        nodes[1].client_port(),
        &OperationRequest::put(during, Bytes::from_static(b"during")),
    )
    .await;
    assert_eq!(response.status, Status::Success);

    coordinator
        .await_report(ReportKind::UpdatedPrimary, 1)
        .await;

    // Sc (node 2) re-points its replication at the replacement and
    // refills the replica slot.
    assert!(
        ctrl(&nodes[2], &CtrlRequest::update_secondary(locator(&replacement)))
            .await
            .ok()
    );
    coordinator
        .await_report(ReportKind::UpdatedSecondary, 2)
        .await;

    // The swap: Sb flushes, the replacement wires its own replication.
    assert!(ctrl(&nodes[1], &CtrlRequest::switch_primary()).await.ok());
    assert!(
        ctrl(&replacement, &CtrlRequest::set_secondary(locator(&nodes[1])))
            .await
            .ok()
    );

    // Every pair is back on the replacement's primary shard, including
    // the write absorbed mid-recovery.
    for tag in 0..20u8 {
        let key = key_owned_by(0, 3, tag);
        let response = request(replacement.client_port(), &OperationRequest::get(key)).await;
        assert_eq!(response.status, Status::Success);
        assert_eq!(&response.value[..], &[tag]);
    }
    let response = request(replacement.client_port(), &OperationRequest::get(during)).await;
    assert_eq!(&response.value[..], b"during");

    // Node 2's range is back in the replacement's replica slot.
    for tag in 0..5u8 {
        let key = key_owned_by(2, 3, tag);
        let response = request(replacement.peer_port(), &OperationRequest::get(key)).await;
        assert_eq!(response.status, Status::Success);
        assert_eq!(&response.value[..], &[0xf0 | tag]);
    }

    // New writes for the range replicate to node 1 again.
    let fresh = key_owned_by(0, 3, 99);
    let response = request(
        replacement.client_port(),
        &OperationRequest::put(fresh, Bytes::from_static(b"fresh")),
    )
    .await;
    assert_eq!(response.status, Status::Success);

    let response = request(nodes[1].peer_port(), &OperationRequest::get(fresh)).await;
    assert_eq!(response.status, Status::Success);
    assert_eq!(&response.value[..], b"fresh");
}
