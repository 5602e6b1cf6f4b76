use std::io::Result;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

/// Socket options applied to every connection we accept or dial.
pub fn tweak(socket: &TcpStream) -> Result<()> {
    // Disable the Nagle algorithm.
    socket.set_nodelay(true)?;

    let sock_ref = SockRef::from(socket);
    sock_ref.set_keepalive(true)?;
    sock_ref.set_tcp_keepalive(&TcpKeepalive::new().with_time(Duration::from_secs(30)))?;

    Ok(())
}
