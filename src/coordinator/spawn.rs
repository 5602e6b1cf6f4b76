//! Child process management: the spawn/ssh contract.
//!
//! Local nodes run the `server` binary shipped next to the coordinator
//! executable. Remote nodes (`user@host` in the configuration) are
//! started over ssh from a well-known directory on the target machine.
//! Either way the child must dial the coordinator's server port and
//! heartbeat within the registration window, after which the coordinator
//! dials the child's control port.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::registry::NodeRecord;
use super::{Coordinator, Error};
use crate::net::Stream;

const REGISTRATION_WINDOW: Duration = Duration::from_secs(10);

const CTRL_DIAL_ATTEMPTS: u32 = 20;
const CTRL_DIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Directory on a remote host holding the server binary.
const REMOTE_PATH: &str = "ringkv";

fn server_binary() -> PathBuf {
    // The server binary ships next to the coordinator.
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("server")))
        .unwrap_or_else(|| PathBuf::from("./server"))
}

fn command(coordinator: &Coordinator, sid: usize) -> Command {
    let addr = &coordinator.node(sid).addr;

    let args = vec![
        "-h".to_string(),
        coordinator.host_name().to_string(),
        "-m".to_string(),
        coordinator.servers_port().to_string(),
        "-c".to_string(),
        addr.client_port.to_string(),
        "-s".to_string(),
        addr.peer_port.to_string(),
        "-M".to_string(),
        addr.control_port.to_string(),
        "-S".to_string(),
        sid.to_string(),
        "-n".to_string(),
        coordinator.num_servers().to_string(),
        "-l".to_string(),
        format!("server_{}.log", sid),
    ];

    if addr.remote() {
        let mut cmd = Command::new("ssh");
        cmd.arg(&addr.host)
            .arg(format!("cd {} && ./server {}", REMOTE_PATH, args.join(" ")));
        cmd
    } else {
        let mut cmd = Command::new(server_binary());
        cmd.args(args);
        cmd
    }
}

/// Start (or restart) the node with the given id and wire up both control
/// channels.
pub(super) async fn spawn_server(coordinator: &Coordinator, sid: usize) -> Result<(), Error> {
    let record = coordinator.node(sid);

    // A previous incarnation may still be around.
    reap(record, Duration::ZERO).await;
    record.clear_ctrl().await;

    let mut cmd = command(coordinator, sid);
    cmd.stdin(Stdio::null());

    let child = cmd.spawn().map_err(|err| Error::Spawn(sid, err))?;
    record.set_child(child);

    info!("spawned node {} on {}", sid, record.addr.host);

    if !record.wait_registered(REGISTRATION_WINDOW).await {
        warn!("node {} never dialed back", sid);
        reap(record, Duration::ZERO).await;
        return Err(Error::RegistrationTimeout(sid));
    }

    let stream = dial_ctrl(record).await?;
    record.set_ctrl(stream).await;

    debug!("control channel to node {} open", sid);

    Ok(())
}

async fn dial_ctrl(record: &NodeRecord) -> Result<Stream, Error> {
    let mut attempt = 0;

    loop {
        match Stream::connect(record.addr.bare_host(), record.addr.control_port).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                attempt += 1;
                if attempt >= CTRL_DIAL_ATTEMPTS {
                    return Err(err.into());
                }
                sleep(CTRL_DIAL_BACKOFF).await;
            }
        }
    }
}

/// Give the child `grace` to exit on its own, then kill it.
pub(super) async fn reap(record: &NodeRecord, grace: Duration) {
    let Some(mut child) = record.take_child() else {
        return;
    };

    if grace > Duration::ZERO && timeout(grace, child.wait()).await.is_ok() {
        return;
    }

    let _ = child.start_kill();
    let _ = child.wait().await;
}
