//! highway - synchronous, thread-per-accept HTTP/1.1 servlet framework
//!
//! A blocking HTTP/1.1 server with a *servlet* surface: the application
//! registers a handler (and optionally a linear chain of filters) that
//! receives a parsed [`Request`] and a [`Response`] builder. There is no
//! event loop and no async runtime; each accept thread serves one
//! connection at a time, end to end.
//!
//! # Design
//!
//! - **Fixed per-thread memory** - every accept thread owns one request
//!   and one response, each backed by a fixed 8 KiB arena that is reset,
//!   never reallocated, between connections. All parsed tokens are
//!   zero-copy views into that arena.
//! - **Strict protocol bounds** - the header section is capped at
//!   [`MAX_HEADER_SIZE`], header counts at [`MAX_HEADERS_COUNT`]; a
//!   request that exceeds either is rejected and the connection closed.
//! - **Keep-alive with honest accounting** - a connection is reused only
//!   when the client asked for it, the handler drained the request body,
//!   and every declared response byte was delivered. Anything else
//!   force-closes.
//! - **Shutdown by socket close** - [`Server::stop`] is signal-safe: it
//!   flips one atomic flag and shuts the listen socket down, which
//!   unblocks every accept loop.
//!
//! # Quick Start
//!
//! ```no_run
//! use highway::{Request, Response, Server, ServerConfig, Servlet};
//!
//! fn main() -> Result<(), highway::Error> {
//!     let servlet = Servlet::builder()
//!         .server(Server::new(ServerConfig::default()))
//!         .handler(|_req: &mut Request, resp: &mut Response| {
//!             resp.set_status_code(200).unwrap();
//!             resp.set_content_length(12).unwrap();
//!             resp.write_body(b"Hello World!").unwrap();
//!         })
//!         .build()?;
//!
//!     // Blocks; the calling thread becomes the final accept loop.
//!     servlet.run()
//! }
//! ```
//!
//! Filters wrap the handler and may short-circuit by not calling
//! [`FilterChain::next`]; see `demos/filters.rs` for a complete chain
//! with per-thread [`Context`] values.
//!
//! # Status codes
//!
//! The status-line mapping is a deliberately small table: `200`, `400`
//! and `404` are canonical, and **every other code is emitted as
//! `418 I'm a teapot`**. The teapot is a loud, testable sentinel for
//! "you used a code this build does not map".

pub(crate) mod http {
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub mod bytes;
pub(crate) mod config;
pub(crate) mod errors;
pub(crate) mod mem;
pub(crate) mod pool;
pub(crate) mod server;
pub(crate) mod servlet;
pub(crate) mod socket;
pub(crate) mod sync;
pub(crate) mod thread;

pub use crate::{
    config::{
        IpVersion, ServerConfig, ServletConfig, SocketConfig, MAX_HEADERS_COUNT, MAX_HEADER_SIZE,
    },
    errors::{Error, IoError},
    http::{request::Request, response::Response},
    mem::Arena,
    pool::{PoolConfig, StartFn, WorkFn, Worker, WorkerPool},
    server::{Client, Server},
    servlet::{Filter, FilterChain, Handler, Servlet, ServletBuilder, ServletThread},
    sync::CriticalSection,
    thread::{Context, ContextKey, ContextValue, Thread, DEFAULT_JOIN_TIMEOUT},
};
