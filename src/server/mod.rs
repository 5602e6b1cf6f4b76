//! Storage node: two shards, synchronous replication, and the node side
//! of the recovery protocol.
//!
//! A node runs a handful of cooperating tasks: one accept loop per
//! listener (client, peer, control), a heartbeat ticker, and a transient
//! task per catch-up push. Client connections get their own short-lived
//! tasks, so the control channel stays responsive while client traffic is
//! quiesced during a primary switch.

pub mod client;
pub mod control;
pub mod error;
pub mod heartbeat;
pub mod peer;
pub mod replicate;
pub mod state;

pub use error::Error;
pub use state::NodeState;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::net::messages::{Report, ReportKind};
use crate::net::Stream;
use crate::sharding::{primary_server_id, secondary_server_id};
use crate::store::ShardStore;

/// Everything a node needs to know about itself at startup.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub coordinator_host: String,
    pub coordinator_port: u16,
    pub client_port: u16,
    pub peer_port: u16,
    pub control_port: u16,
    pub server_id: usize,
    pub num_servers: usize,
}

/// Handle to a running storage node. Cheap to clone.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    options: NodeOptions,
    primary: ShardStore,
    secondary: ShardStore,
    state: parking_lot::Mutex<NodeState>,
    /// Outbound connection to the node replicating our primary shard.
    secondary_out: Mutex<Option<Stream>>,
    /// Outbound connection to the replacement of our failed predecessor,
    /// used while we act as primary for its range.
    primary_out: Mutex<Option<Stream>>,
    coordinator_out: Mutex<Option<Stream>>,
    /// Client writes hold the read half; the switch-primary flush takes
    /// the write half to drain them.
    write_gate: RwLock<()>,
    listeners: parking_lot::Mutex<Option<Listeners>>,
    ports: Ports,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

struct Listeners {
    client: TcpListener,
    peer: TcpListener,
    control: TcpListener,
}

#[derive(Debug, Clone, Copy)]
struct Ports {
    client: u16,
    peer: u16,
    control: u16,
}

impl Node {
    /// Bind the three listeners. Ports may be zero; the resolved ports are
    /// available from the accessors below.
    pub async fn bind(options: NodeOptions) -> Result<Self, Error> {
        let client = TcpListener::bind(("0.0.0.0", options.client_port)).await?;
        let peer = TcpListener::bind(("0.0.0.0", options.peer_port)).await?;
        let control = TcpListener::bind(("0.0.0.0", options.control_port)).await?;

        let ports = Ports {
            client: client.local_addr()?.port(),
            peer: peer.local_addr()?.port(),
            control: control.local_addr()?.port(),
        };

        Ok(Self {
            inner: Arc::new(NodeInner {
                options,
                primary: ShardStore::new(),
                secondary: ShardStore::new(),
                state: parking_lot::Mutex::new(NodeState::Online),
                secondary_out: Mutex::new(None),
                primary_out: Mutex::new(None),
                coordinator_out: Mutex::new(None),
                write_gate: RwLock::new(()),
                listeners: parking_lot::Mutex::new(Some(Listeners {
                    client,
                    peer,
                    control,
                })),
                ports,
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        })
    }

    /// Register with the coordinator and start all worker tasks.
    pub async fn run(&self) -> Result<(), Error> {
        let options = &self.inner.options;

        let stream = Stream::connect(&options.coordinator_host, options.coordinator_port).await?;
        *self.inner.coordinator_out.lock().await = Some(stream);

        let listeners = self
            .inner
            .listeners
            .lock()
            .take()
            .ok_or(Error::AlreadyRunning)?;

        self.spawn(client::run(self.clone(), listeners.client));
        self.spawn(peer::run(self.clone(), listeners.peer));
        self.spawn(control::run(self.clone(), listeners.control));
        self.spawn(heartbeat::run(self.clone()));

        info!(
            "node {} up: client port {}, peer port {}, control port {}",
            self.id(),
            self.client_port(),
            self.peer_port(),
            self.control_port()
        );

        Ok(())
    }

    /// Block until shutdown is requested, then drain worker tasks.
    pub async fn wait(&self) {
        self.inner.shutdown.cancelled().await;
        self.inner.tracker.close();

        let _ = tokio::time::timeout(Duration::from_secs(5), self.inner.tracker.wait()).await;

        debug!("node {} stopped", self.id());
    }

    /// Request shutdown; all worker loops observe the token and exit.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn id(&self) -> usize {
        self.inner.options.server_id
    }

    pub fn num_servers(&self) -> usize {
        self.inner.options.num_servers
    }

    /// Id of the ring predecessor whose primary shard we replicate.
    pub fn primary_sid(&self) -> usize {
        primary_server_id(self.id(), self.num_servers())
    }

    /// Id of the ring successor replicating our primary shard.
    pub fn secondary_sid(&self) -> usize {
        secondary_server_id(self.id(), self.num_servers())
    }

    pub fn client_port(&self) -> u16 {
        self.inner.ports.client
    }

    pub fn peer_port(&self) -> u16 {
        self.inner.ports.peer
    }

    pub fn control_port(&self) -> u16 {
        self.inner.ports.control
    }

    pub fn state(&self) -> NodeState {
        *self.inner.state.lock()
    }

    pub(super) fn set_state(&self, state: NodeState) {
        let mut current = self.inner.state.lock();
        debug!("node {} state: {} -> {}", self.id(), *current, state);
        *current = state;
    }

    pub fn primary_store(&self) -> &ShardStore {
        &self.inner.primary
    }

    pub fn secondary_store(&self) -> &ShardStore {
        &self.inner.secondary
    }

    pub(super) fn secondary_out(&self) -> &Mutex<Option<Stream>> {
        &self.inner.secondary_out
    }

    pub(super) fn primary_out(&self) -> &Mutex<Option<Stream>> {
        &self.inner.primary_out
    }

    pub(super) async fn gate_read(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.write_gate.read().await
    }

    pub(super) async fn gate_write(&self) -> RwLockWriteGuard<'_, ()> {
        self.inner.write_gate.write().await
    }

    pub(super) fn cancelled(&self) -> impl Future<Output = ()> + '_ {
        self.inner.shutdown.cancelled()
    }

    pub(super) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.tracker.spawn(future);
    }

    /// Send a report to the coordinator over the registration connection.
    pub(super) async fn report(&self, kind: ReportKind) -> Result<(), Error> {
        let mut guard = self.inner.coordinator_out.lock().await;

        if let Some(stream) = guard.as_mut() {
            stream.send(&Report::new(kind, self.id())).await?;
        }

        Ok(())
    }
}
