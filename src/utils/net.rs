//! Networking helpers for binding sockets with explicit IPv6-only behavior
//! and for configuring accepted sockets for low-latency delivery.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};

const LISTEN_BACKLOG: i32 = 1024;

/// Idle time before the first keepalive probe is sent on a downstream client socket.
pub const KEEPALIVE_IDLE: Duration = Duration::from_secs(30);

fn domain_for(addr: &SocketAddr) -> Domain {
    match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    }
}

/// Bind a TCP listener with `SO_REUSEADDR` set and, for IPv6 addresses,
/// `IPV6_V6ONLY` set so the same port can be bound separately on IPv4.
pub fn bind_tcp_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(domain_for(&addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if let SocketAddr::V6(_) = addr {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    TcpListener::from_std(socket.into())
}

/// Configure an accepted downstream connection for low-latency delivery:
/// disable Nagle's algorithm and enable keepalive probing with a 30-second
/// idle time so a half-open peer is detected instead of held open forever.
pub fn configure_client_socket(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;

    let socket = socket2::SockRef::from(stream);
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_IDLE);
    socket.set_tcp_keepalive(&keepalive)?;
    Ok(())
}
