//! TCP listener setup and accept, with full socket-option wiring.

use crate::{
    config::{IpVersion, SocketConfig},
    errors::Error,
};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, TcpStream},
    time::Duration,
};

const LISTEN_BACKLOG: i32 = 500;

/// Creates, configures, binds and listens the server socket.
///
/// Options applied: `SO_REUSEADDR`, `SO_REUSEPORT` where available,
/// `TCP_NODELAY`, `SO_LINGER` off, `IPV6_V6ONLY` off for dual-stack, and
/// the configured receive/send timeouts (zero = infinite). Binds to the
/// explicit address when one is configured, ANY otherwise.
pub(crate) fn listen(config: &SocketConfig) -> Result<Socket, Error> {
    let domain = match config.ip_version {
        IpVersion::V4 => Domain::IPV4,
        IpVersion::V6 | IpVersion::DualStack => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| Error::SocketCreate(e.into()))?;

    if let Err(e) = configure(&socket, config) {
        return Err(Error::SocketConfig(e.into()));
    }

    let address: SocketAddr = match config.ip_version {
        IpVersion::V4 => SocketAddrV4::new(
            config.bind_address.unwrap_or(Ipv4Addr::UNSPECIFIED),
            config.port,
        )
        .into(),
        IpVersion::V6 | IpVersion::DualStack => {
            SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, config.port, 0, 0).into()
        }
    };

    socket
        .bind(&SockAddr::from(address))
        .map_err(|e| Error::SocketBind(e.into()))?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|e| Error::SocketListen(e.into()))?;

    Ok(socket)
}

fn configure(socket: &Socket, config: &SocketConfig) -> io::Result<()> {
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_tcp_nodelay(true)?;
    socket.set_linger(None)?;

    if config.ip_version == IpVersion::DualStack {
        socket.set_only_v6(false)?;
    }

    set_timeouts(socket, config)
}

fn set_timeouts(socket: &Socket, config: &SocketConfig) -> io::Result<()> {
    socket.set_read_timeout(non_zero(config.read_timeout))?;
    socket.set_write_timeout(non_zero(config.write_timeout))
}

#[inline]
fn non_zero(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

/// Accepts one connection.
///
/// The accepted socket does not reliably inherit options from the
/// listener, so the timeouts and `TCP_NODELAY` are re-applied explicitly.
/// The peer address is captured in textual form (sized for IPv6).
pub(crate) fn accept(listener: &Socket, config: &SocketConfig) -> Result<(TcpStream, String), Error> {
    let (socket, peer) = listener.accept().map_err(|e| match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::SocketTimeout,
        _ => Error::SocketAccept(e.into()),
    })?;

    if let Err(e) = socket.set_tcp_nodelay(true).and_then(|_| set_timeouts(&socket, config)) {
        return Err(Error::SocketConfig(e.into()));
    }

    let address = match peer.as_socket() {
        Some(addr) => addr.ip().to_string(),
        None => String::new(),
    };

    Ok((socket.into(), address))
}

pub(crate) fn local_addr(socket: &Socket) -> Option<SocketAddr> {
    socket.local_addr().ok().and_then(|addr| addr.as_socket())
}
