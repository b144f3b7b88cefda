//! Server lifecycle: listen socket, running flag, accept.

use crate::{config::ServerConfig, errors::Error, socket};
use socket2::Socket;
use std::{
    any::Any,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock, PoisonError,
    },
};

/// The listening half of the framework.
///
/// A `Server` owns the listen socket and a single atomic `running` flag.
/// [`stop`](Server::stop) is idempotent and signal-safe: it clears the
/// flag and shuts the listen socket down, which is the mechanism that
/// makes every blocked [`accept`](Server::accept) return so the accept
/// loops can observe the shutdown. There is no cancellation token.
///
/// Ownership moves into the [`Servlet`](crate::Servlet) for the duration
/// of a run; keep an `Arc` (via [`Servlet::server`](crate::Servlet::server))
/// for signal handlers that need to call `stop`.
pub struct Server {
    config: ServerConfig,
    socket: OnceLock<Socket>,
    running: AtomicBool,
    user_data: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

impl Server {
    /// Creates a stopped server; no socket exists until
    /// [`start`](Server::start).
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            socket: OnceLock::new(),
            running: AtomicBool::new(false),
            user_data: Mutex::new(None),
        }
    }

    /// Binds and listens. Fails if the server was already started or the
    /// listener could not be established.
    pub fn start(&self) -> Result<(), Error> {
        let listener = socket::listen(&self.config.socket)?;
        if self.socket.set(listener).is_err() {
            return Err(Error::ConfigInvalid("server already started"));
        }

        self.running.store(true, Ordering::Release);
        log::info!(
            "server listening on port {} ({:?})",
            self.local_addr().map(|a| a.port()).unwrap_or(0),
            self.config.socket.ip_version,
        );
        Ok(())
    }

    /// Stops the server: clears the running flag and shuts the listen
    /// socket down to unblock `accept`. Safe to call repeatedly and from
    /// a signal handler.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            if let Some(socket) = self.socket.get() {
                let _ = socket.shutdown(Shutdown::Both);
            }
            log::debug!("server stopped");
        }
    }

    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The bound address, once started. Useful with port `0`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.get().and_then(socket::local_addr)
    }

    /// Attaches opaque shared data. Refused once the listen socket exists.
    pub fn set_user_data(&self, data: Arc<dyn Any + Send + Sync>) -> Result<(), Error> {
        if self.socket.get().is_some() {
            return Err(Error::ConfigInvalid("server already started"));
        }
        *self
            .user_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(data);
        Ok(())
    }

    pub fn get_user_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.user_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Accepts one client.
    ///
    /// Returns `None` on accept timeout and on shutdown alike; callers
    /// loop on [`is_running`](Server::is_running), so both simply continue
    /// (and the loop test exits once the server stopped).
    pub fn accept(&self) -> Option<Client> {
        if !self.is_running() {
            return None;
        }
        let listener = self.socket.get()?;

        match socket::accept(listener, &self.config.socket) {
            Ok((stream, address)) => Some(Client { stream, address }),
            Err(Error::SocketTimeout) => None,
            Err(error) => {
                if self.is_running() {
                    log::debug!("failed to accept client: {error}");
                }
                None
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.is_running() {
            log::warn!("server dropped while running");
            self.stop();
        }
    }
}

/// A connected client: stream plus textual peer address.
pub struct Client {
    stream: TcpStream,
    address: String,
}

impl Client {
    /// The peer address, captured at accept time.
    #[inline(always)]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Single receive; short reads are normal.
    #[inline]
    pub(crate) fn recv(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        self.stream.read(dest)
    }

    /// Send-all: loops until every byte is written or the socket fails.
    #[inline]
    pub(crate) fn send_all(&mut self, src: &[u8]) -> io::Result<()> {
        self.stream.write_all(src)
    }

    /// Duplicates the handle so the request and response sides can hold
    /// the connection independently.
    pub(crate) fn try_clone(&self) -> io::Result<Client> {
        Ok(Client {
            stream: self.stream.try_clone()?,
            address: self.address.clone(),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream,
            address: String::from("127.0.0.1"),
        }
    }
}
