//! Server, socket and servlet configuration
//!
//! Defaults are intentionally conservative: bounded header sections,
//! bounded header counts, and fixed per-thread memory mean a connection can
//! never make the server allocate more than it did at startup.
//!
//! # Memory Consumption
//!
//! Each accept thread owns exactly one request arena and one response arena
//! of [`MAX_HEADER_SIZE`] bytes each; they are reset, never reallocated,
//! between connections.

use std::{net::Ipv4Addr, time::Duration};

/// Maximum size of a request or response header section in bytes (8 KiB).
///
/// Covers the status line, every header line and the final CRLF separator.
/// A request whose header section does not fit is rejected and the
/// connection closed.
pub const MAX_HEADER_SIZE: usize = 8 * 1024;

/// Maximum number of headers in each direction.
pub const MAX_HEADERS_COUNT: usize = 32;

/// IP protocol family for the listen socket.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IpVersion {
    /// IPv4 only.
    V4,
    /// IPv6 only.
    V6,
    /// IPv6 socket with `IPV6_V6ONLY` disabled, serving IPv4 clients
    /// through mapped addresses.
    DualStack,
}

/// TCP listener configuration.
///
/// # Examples
///
/// ```
/// use highway::{SocketConfig, IpVersion};
/// use std::time::Duration;
///
/// let config = SocketConfig {
///     port: 8080,
///     read_timeout: Duration::from_secs(5),
///     ip_version: IpVersion::V4,
///     ..SocketConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Port to listen on (default: `8080`).
    pub port: u16,

    /// Receive timeout applied to the listen socket and every accepted
    /// socket (default: `0` = infinite).
    ///
    /// A read that exceeds this surfaces as a timeout error and terminates
    /// the current connection; on the listen socket it bounds how long
    /// `accept` blocks, which keeps shutdown responsive.
    pub read_timeout: Duration,

    /// Send timeout applied the same way (default: `0` = infinite).
    pub write_timeout: Duration,

    /// Protocol family (default: [`IpVersion::DualStack`]).
    pub ip_version: IpVersion,

    /// Explicit IPv4 address to bind to; `None` binds ANY
    /// (default: `None`). Only honored for [`IpVersion::V4`].
    pub bind_address: Option<Ipv4Addr>,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            read_timeout: Duration::ZERO,
            write_timeout: Duration::ZERO,
            ip_version: IpVersion::DualStack,
            bind_address: None,

            _priv: (),
        }
    }
}

/// Server configuration. Currently the socket settings are the whole
/// surface; the struct exists so server-level knobs can grow without
/// breaking [`Server::new`](crate::Server::new) callers.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Listener settings.
    pub socket: SocketConfig,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

/// Servlet runtime configuration.
#[derive(Debug, Clone)]
pub struct ServletConfig {
    /// Number of accept threads to spawn (default: `8`).
    ///
    /// The calling thread joins them as one more accept loop when
    /// [`Servlet::run`](crate::Servlet::run) is invoked, so the total
    /// number of loops contending on `accept` is `num_accept_threads + 1`.
    pub num_accept_threads: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServletConfig {
    fn default() -> Self {
        Self {
            num_accept_threads: 8,

            _priv: (),
        }
    }
}
