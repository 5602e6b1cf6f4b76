//! Cluster membership records.
//!
//! One record per storage node: the static identity from the
//! configuration file plus the runtime state the failure detector and the
//! recovery orchestrator work against. Runtime state sits behind a short
//! non-async mutex; the outbound control channel has its own async lock
//! so request/response exchanges with a node never interleave.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::process::Child;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::config::{ClusterConfig, NodeAddr};
use crate::net::messages::{
    CtrlCommand, CtrlRequest, CtrlResponse, CtrlStatus, FromBytes, MessageCode,
};
use crate::net::Stream;

use super::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeStatus {
    #[default]
    Online,
    /// A replacement is being reconstructed for this node.
    Recon,
    Failed,
}

/// Mutable per-node state. Guarded by the record's mutex.
#[derive(Debug, Default)]
pub struct NodeRuntime {
    pub status: NodeStatus,
    pub last_heartbeat: Option<Instant>,
    pub updated_primary_ack: bool,
    pub updated_secondary_ack: bool,
    /// Client puts for this node's range are refused while the primary
    /// swap lands.
    pub quiesce_puts: bool,
    /// The second ack triggers the switch exactly once.
    pub switch_started: bool,
    pub recovery_attempts: u32,
}

pub struct NodeRecord {
    pub id: usize,
    pub addr: NodeAddr,
    runtime: Mutex<NodeRuntime>,
    ctrl: tokio::sync::Mutex<Option<Stream>>,
    child: Mutex<Option<Child>>,
}

impl NodeRecord {
    pub fn new(id: usize, addr: NodeAddr) -> Self {
        Self {
            id,
            addr,
            runtime: Mutex::new(NodeRuntime::default()),
            ctrl: tokio::sync::Mutex::new(None),
            child: Mutex::new(None),
        }
    }

    pub fn runtime(&self) -> MutexGuard<'_, NodeRuntime> {
        self.runtime.lock()
    }

    pub fn status(&self) -> NodeStatus {
        self.runtime.lock().status
    }

    /// Record a heartbeat. Nothing else changes; beats from a node
    /// already written off are dropped.
    pub fn heartbeat(&self) {
        let mut runtime = self.runtime.lock();

        if runtime.status == NodeStatus::Failed {
            debug!("ignoring heartbeat from failed node {}", self.id);
            return;
        }

        runtime.last_heartbeat = Some(Instant::now());
    }

    /// Wait for the node's first heartbeat, up to `window`.
    pub async fn wait_registered(&self, window: Duration) -> bool {
        let deadline = Instant::now() + window;

        loop {
            if self.runtime.lock().last_heartbeat.is_some() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn set_ctrl(&self, stream: Stream) {
        *self.ctrl.lock().await = Some(stream);
    }

    pub async fn clear_ctrl(&self) {
        *self.ctrl.lock().await = None;
    }

    /// One control exchange with the node: send the request, read the
    /// acknowledgment. Shutdown is fire-and-forget.
    pub async fn send_ctrl(&self, request: &CtrlRequest) -> Result<CtrlStatus, Error> {
        let mut guard = self.ctrl.lock().await;
        let stream = guard.as_mut().ok_or(Error::NoControlChannel(self.id))?;

        stream.send(request).await?;

        if request.command == CtrlCommand::Shutdown {
            return Ok(CtrlStatus::Success);
        }

        let payload = stream.recv_require(MessageCode::CtrlResponse).await?;
        let response = CtrlResponse::from_bytes(payload)?;

        Ok(response.status)
    }

    pub fn set_child(&self, child: Child) {
        *self.child.lock() = Some(child);
    }

    pub fn take_child(&self) -> Option<Child> {
        self.child.lock().take()
    }
}

pub struct Registry {
    nodes: Vec<NodeRecord>,
}

impl Registry {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            nodes: config
                .nodes
                .iter()
                .enumerate()
                .map(|(id, addr)| NodeRecord::new(id, addr.clone()))
                .collect(),
        }
    }

    pub fn node(&self, id: usize) -> &NodeRecord {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
