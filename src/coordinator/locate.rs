//! Client redirector.
//!
//! Stateless lookup: which node currently owns client writes for a key.
//! While a primary is being reconstructed its ring successor answers for
//! the range; while the final swap is landing, requests for the range are
//! dropped on the floor and the client retries.

use tokio::net::TcpListener;
use tokio::select;
use tracing::{debug, warn};

use crate::net::messages::{FromBytes, LocateRequest, LocateResponse, MessageCode};
use crate::net::Stream;
use crate::sharding::{secondary_server_id, Key};

use super::registry::NodeStatus;
use super::Coordinator;

pub(super) async fn run(coordinator: Coordinator, listener: TcpListener) {
    loop {
        select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, _)) => {
                    let coordinator = coordinator.clone();
                    coordinator.clone().spawn(async move {
                        select! {
                            _ = handle(coordinator.clone(), Stream::new(socket)) => (),
                            _ = coordinator.cancelled() => (),
                        }
                    });
                }
                Err(err) => {
                    warn!("client accept failed: {}", err);
                }
            },

            _ = coordinator.cancelled() => break,
        }
    }
}

async fn handle(coordinator: Coordinator, mut stream: Stream) {
    let request = match stream.recv().await {
        Ok(message) => match message
            .require(MessageCode::LocateRequest)
            .and_then(LocateRequest::from_bytes)
        {
            Ok(request) => request,
            Err(err) => {
                debug!("bad locate message: {}", err);
                return;
            }
        },
        Err(err) => {
            debug!("locate read failed: {}", err);
            return;
        }
    };

    // A quiesced range: drop the request, the client retries.
    let Some(response) = resolve(&coordinator, &request.key) else {
        debug!("dropping locate for quiesced key {}", request.key);
        return;
    };

    let _ = stream.send(&response).await;
}

/// Resolve a key to the node currently owning its client writes.
pub(super) fn resolve(coordinator: &Coordinator, key: &Key) -> Option<LocateResponse> {
    let n = coordinator.num_servers();
    let mut sid = key.server_id(n);

    // Primary down: its ring successor fronts the range meanwhile.
    if coordinator.node(sid).status() != NodeStatus::Online {
        sid = secondary_server_id(sid, n);
    }

    let record = coordinator.node(sid);

    if record.runtime().quiesce_puts {
        return None;
    }

    Some(LocateResponse {
        host: record.addr.bare_host().to_string(),
        port: record.addr.client_port,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::coordinator::CoordinatorOptions;
    use crate::sharding::{Key, KEY_SIZE};
    use std::time::Duration;

    async fn test_coordinator() -> Coordinator {
        let config = ClusterConfig::parse(
            "3\n\
             localhost 7000 7001 7002\n\
             localhost 7010 7011 7012\n\
             localhost 7020 7021 7022\n",
        )
        .unwrap();

        Coordinator::bind(CoordinatorOptions {
            client_port: 0,
            servers_port: 0,
            heartbeat_timeout: Duration::from_secs(3),
            config,
        })
        .await
        .unwrap()
    }

    fn key_owned_by(sid: usize) -> Key {
        let mut bytes = [0u8; KEY_SIZE];
        for counter in 0..u32::MAX {
            bytes[..4].copy_from_slice(&counter.to_be_bytes());
            let key = Key::new(bytes);
            if key.server_id(3) == sid {
                return key;
            }
        }
        unreachable!();
    }

    #[tokio::test]
    async fn test_resolve_online() {
        let coordinator = test_coordinator().await;

        let key = key_owned_by(1);
        let response = resolve(&coordinator, &key).unwrap();
        assert_eq!(response.port, 7010);
        assert_eq!(response.host, "localhost");
    }

    #[tokio::test]
    async fn test_resolve_redirects_to_secondary() {
        let coordinator = test_coordinator().await;

        coordinator.node(1).runtime().status = NodeStatus::Recon;

        let key = key_owned_by(1);
        let response = resolve(&coordinator, &key).unwrap();
        assert_eq!(response.port, 7020);
    }

    #[tokio::test]
    async fn test_resolve_drops_quiesced() {
        let coordinator = test_coordinator().await;

        let key = key_owned_by(0);
        coordinator.node(0).runtime().quiesce_puts = true;
        assert!(resolve(&coordinator, &key).is_none());

        // Redirect target quiesced drops too.
        coordinator.node(0).runtime().quiesce_puts = false;
        coordinator.node(0).runtime().status = NodeStatus::Recon;
        coordinator.node(1).runtime().quiesce_puts = true;
        assert!(resolve(&coordinator, &key).is_none());
    }
}
