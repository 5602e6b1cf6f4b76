//! Metadata coordinator.
//!
//! Single point of truth for the cluster: spawns the storage nodes, hands
//! out key locations to clients, watches heartbeats, and drives the
//! recovery protocol when a node dies. Recovery itself is driven by
//! message handlers and one task per failed node; the coordinator proper
//! is just listeners plus a sweep timer.

pub mod error;
pub mod locate;
pub mod monitor;
pub mod recovery;
pub mod registry;
pub mod spawn;

pub use error::Error;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{stdin, AsyncReadExt};
use tokio::net::TcpListener;
use tokio::select;
use tokio::signal::ctrl_c;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::ClusterConfig;
use crate::net::messages::{CtrlRequest, FromBytes, MessageCode, Report};
use crate::net::Stream;
use crate::util::local_host_name;

use registry::{NodeRecord, Registry};

const CHILD_EXIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub client_port: u16,
    pub servers_port: u16,
    pub heartbeat_timeout: Duration,
    pub config: ClusterConfig,
}

/// Handle to the coordinator. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    options: CoordinatorOptions,
    registry: Registry,
    host_name: String,
    /// Serializes recoveries cluster-wide.
    recovery: Mutex<()>,
    listeners: parking_lot::Mutex<Option<Listeners>>,
    ports: Ports,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

struct Listeners {
    clients: TcpListener,
    servers: TcpListener,
}

#[derive(Debug, Clone, Copy)]
struct Ports {
    clients: u16,
    servers: u16,
}

impl Coordinator {
    /// Bind both listeners. Ports may be zero; the resolved ports are
    /// available from the accessors below.
    pub async fn bind(options: CoordinatorOptions) -> Result<Self, Error> {
        let clients = TcpListener::bind(("0.0.0.0", options.client_port)).await?;
        let servers = TcpListener::bind(("0.0.0.0", options.servers_port)).await?;

        let ports = Ports {
            clients: clients.local_addr()?.port(),
            servers: servers.local_addr()?.port(),
        };

        let registry = Registry::new(&options.config);

        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                options,
                registry,
                host_name: local_host_name(),
                recovery: Mutex::new(()),
                listeners: parking_lot::Mutex::new(Some(Listeners { clients, servers })),
                ports,
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        })
    }

    /// Start the cluster: spawn every node, wire the replication ring,
    /// then open for client traffic.
    pub async fn run(&self) -> Result<(), Error> {
        let listeners = self
            .inner
            .listeners
            .lock()
            .take()
            .ok_or(Error::AlreadyRunning)?;

        info!(
            "coordinator starting on {}: client port {}, servers port {}",
            self.host_name(),
            self.client_port(),
            self.servers_port()
        );

        // Nodes dial back as soon as they start.
        self.spawn(accept_servers(self.clone(), listeners.servers));

        for sid in 0..self.num_servers() {
            spawn::spawn_server(self, sid).await?;
        }

        // Wire the replication ring.
        for sid in 0..self.num_servers() {
            recovery::send_set_secondary(self, sid).await?;
        }

        self.spawn(locate::run(self.clone(), listeners.clients));
        self.spawn(monitor::run(self.clone()));

        info!("coordinator initialized, {} nodes", self.num_servers());

        Ok(())
    }

    /// Block until stdin closes (or Ctrl-C), then take the cluster down.
    pub async fn wait_for_shutdown(&self) {
        let mut buffer = [0u8; 1024];
        let mut stdin = stdin();

        loop {
            select! {
                read = stdin.read(&mut buffer) => match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                },
                _ = ctrl_c() => break,
                _ = self.inner.shutdown.cancelled() => break,
            }
        }

        self.shutdown_cluster().await;
    }

    /// Ask every node to exit, give the children a grace period, then
    /// kill whatever is left.
    pub async fn shutdown_cluster(&self) {
        info!("coordinator shutting down");

        for record in self.registry().nodes() {
            if let Err(err) = record.send_ctrl(&CtrlRequest::shutdown()).await {
                debug!("shutdown request to node {} failed: {}", record.id, err);
            }
        }

        for record in self.registry().nodes() {
            spawn::reap(record, CHILD_EXIT_GRACE).await;
        }

        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        let _ = tokio::time::timeout(Duration::from_secs(1), self.inner.tracker.wait()).await;
    }

    pub fn num_servers(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn client_port(&self) -> u16 {
        self.inner.ports.clients
    }

    pub fn servers_port(&self) -> u16 {
        self.inner.ports.servers
    }

    pub fn host_name(&self) -> &str {
        &self.inner.host_name
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.inner.options.heartbeat_timeout
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn node(&self, id: usize) -> &NodeRecord {
        self.inner.registry.node(id)
    }

    pub(super) async fn recovery_lock(&self) -> MutexGuard<'_, ()> {
        self.inner.recovery.lock().await
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
}

/// Accept connections from storage nodes and pump their reports. Nodes
/// identify themselves by id in every report, so the loop doesn't care
/// which connection belongs to whom.
async fn accept_servers(coordinator: Coordinator, listener: TcpListener) {
    loop {
        select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, addr)) => {
                    debug!("node connection from {}", addr);
                    let coordinator = coordinator.clone();
                    coordinator.clone().spawn(async move {
                        select! {
                            _ = serve_reports(coordinator.clone(), Stream::new(socket)) => (),
                            _ = coordinator.cancelled() => (),
                        }
                    });
                }
                Err(err) => {
                    warn!("server accept failed: {}", err);
                }
            },

            _ = coordinator.cancelled() => break,
        }
    }
}

async fn serve_reports(coordinator: Coordinator, mut stream: Stream) {
    loop {
        let report = match stream.recv().await {
            Ok(message) => match message
                .require(MessageCode::Report)
                .and_then(Report::from_bytes)
            {
                Ok(report) => report,
                Err(err) => {
                    error!("bad node report: {}", err);
                    return;
                }
            },
            Err(err) => {
                debug!("node connection closed: {}", err);
                return;
            }
        };

        recovery::handle_report(&coordinator, &report).await;
    }
}
