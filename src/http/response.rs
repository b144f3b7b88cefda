//! Incremental HTTP response builder with strict ordering.

use crate::{
    bytes,
    config::MAX_HEADER_SIZE,
    errors::Error,
    http::types::{self, Header, HeaderSet},
    mem::Arena,
    server::Client,
};
use std::mem;

/// Ordering state of the response.
///
/// Together with the error latch this encodes the builder's life cycle:
/// the status line is written lazily on the first header, and once the
/// header block is flushed no header may follow.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ResponseState {
    /// Nothing serialized yet; the status code may still change.
    Clean,
    /// Status line written into the arena; headers may be appended.
    StatusWritten,
    /// Header block sent to the client; only body bytes may follow.
    HeadersSent,
    /// A failure was latched; every call short-circuits and the
    /// connection closes after this cycle.
    Error,
}

/// HTTP response builder.
///
/// Serialization is incremental into a fixed arena and enforces
/// **status code → headers → CRLF separator → body**:
///
/// - [`set_status_code`](Response::set_status_code) must come before the
///   first header;
/// - [`write_header`](Response::write_header) emits the status line on its
///   first call and is rejected once the headers are flushed;
/// - [`write_body`](Response::write_body) requires a declared content
///   length and flushes the headers implicitly.
///
/// Any failure (arena overflow, short send, ordering violation) latches
/// an error: subsequent calls fail fast and the connection is closed once
/// the handler returns.
pub struct Response {
    arena: Arena,
    client: Option<Client>,
    headers: HeaderSet,

    state: ResponseState,
    content_length_set: bool,
    connection_set: bool,

    status_code: u16,
    content_length: Option<usize>,
    remaining_bytes: usize,
    connection_close: bool,
}

impl Response {
    pub(crate) fn new() -> Self {
        Self {
            arena: Arena::fixed(MAX_HEADER_SIZE),
            client: None,
            headers: HeaderSet::new(),
            state: ResponseState::Clean,
            content_length_set: false,
            connection_set: false,
            status_code: 0,
            content_length: None,
            remaining_bytes: 0,
            connection_close: true,
        }
    }

    /// Rebinds the response to a new client and clears all state.
    pub(crate) fn reset(&mut self, client: Client) {
        self.arena.reset();
        self.client = Some(client);
        self.headers.reset();
        self.state = ResponseState::Clean;
        self.content_length_set = false;
        self.connection_set = false;
        self.status_code = 0;
        self.content_length = None;
        self.remaining_bytes = 0;
        self.connection_close = true;
    }

    /// Releases the client handle so the connection can be reused or
    /// closed by the caller.
    pub(crate) fn detach(&mut self) -> Option<Client> {
        self.client.take()
    }

    /// Pre-handler mirror of the request's close intent. Does not write a
    /// header; the intent is serialized by `flush_headers` unless the
    /// handler overrode it.
    pub(crate) fn set_close_intent(&mut self, close: bool) {
        self.connection_close = close;
    }

    /// Whether the connection must close after this cycle.
    pub(crate) fn close_intent(&self) -> bool {
        self.connection_close || self.state == ResponseState::Error
    }

    pub(crate) fn is_error(&self) -> bool {
        self.state == ResponseState::Error
    }

    /// Declared body bytes not yet pushed via `write_body`.
    pub(crate) fn remaining_bytes(&self) -> usize {
        self.remaining_bytes
    }
}

// Public API
impl Response {
    /// Stores the status code. Must be called before the first header is
    /// written; any `u16` is accepted and mapped when the status line is
    /// emitted (unknown codes become `418 I'm a teapot`).
    pub fn set_status_code(&mut self, code: u16) -> Result<(), Error> {
        self.guard()?;
        if self.state != ResponseState::Clean {
            return Err(self.latch("status code after status line was written"));
        }
        self.status_code = code;
        Ok(())
    }

    /// Appends a header.
    ///
    /// The first call emits the status line. Rejected after the headers
    /// were flushed, before a status code is set, and for a name that was
    /// already written (byte-exact comparison).
    pub fn write_header(&mut self, name: &[u8], value: &[u8]) -> Result<(), Error> {
        self.guard()?;
        match self.state {
            ResponseState::HeadersSent => {
                return Err(self.latch("header after headers were sent"))
            }
            ResponseState::Clean => self.write_status_line()?,
            _ => {}
        }

        if self.headers.contains_exact(name) {
            log::error!("response header {} written twice", String::from_utf8_lossy(name));
            return Err(self.latch("duplicate header"));
        }

        let name_view = self.push_view(name)?;
        self.push_bytes(b": ")?;
        let value_view = self.push_view(value)?;
        self.push_bytes(b"\r\n")?;

        let header = Header {
            name: name_view,
            value: value_view,
        };
        if self.headers.push(header).is_err() {
            self.state = ResponseState::Error;
            return Err(Error::ResourceExhausted);
        }
        Ok(())
    }

    /// Writes the `Content-Length` header and seeds the body accounting.
    /// Only the first call takes effect; later calls are no-ops.
    pub fn set_content_length(&mut self, length: usize) -> Result<(), Error> {
        self.guard()?;
        if self.content_length_set {
            return Ok(());
        }

        let mut digits = [0u8; 20];
        let written = bytes::uint_to_bytes(&mut digits, length as u64);
        self.write_header(b"Content-Length", &digits[..written])?;

        self.content_length = Some(length);
        self.remaining_bytes = length;
        self.content_length_set = true;
        Ok(())
    }

    /// Writes the `Connection` header (`close` or `keep-alive`) and
    /// records the intent. Only the first call takes effect.
    pub fn set_connection_close(&mut self, close: bool) -> Result<(), Error> {
        self.guard()?;
        if self.connection_set {
            return Ok(());
        }

        let value: &[u8] = if close { b"close" } else { b"keep-alive" };
        self.write_header(b"Connection", value)?;

        self.connection_close = close;
        self.connection_set = true;
        Ok(())
    }

    /// Writes the `Content-Type` header.
    pub fn set_content_type(&mut self, mime: &[u8]) -> Result<(), Error> {
        self.write_header(b"Content-Type", mime)
    }

    /// Flushes the header block to the client. Idempotent.
    ///
    /// Fills in `Content-Length: 0` when no length was declared and the
    /// `Connection` header from the recorded intent when the handler did
    /// not write one, appends the final CRLF and sends the whole block in
    /// one call.
    pub fn flush_headers(&mut self) -> Result<(), Error> {
        self.guard()?;
        if self.state == ResponseState::HeadersSent {
            return Ok(());
        }

        if self.status_code == 0 {
            log::error!("no status code set for the response");
            return Err(self.latch("status code not set"));
        }

        if !self.content_length_set {
            self.set_content_length(0)?;
        }
        if !self.connection_set {
            self.set_connection_close(self.connection_close)?;
        }
        #[cfg(feature = "server-header")]
        if !self.headers.contains_exact(b"Server") {
            const SERVER: &str = concat!("Highway ", env!("CARGO_PKG_VERSION"));
            self.write_header(b"Server", SERVER.as_bytes())?;
        }

        self.push_bytes(b"\r\n")?;

        let block_len = self.arena.size();
        self.send(block_len)?;
        self.state = ResponseState::HeadersSent;
        Ok(())
    }

    /// Sends body bytes, flushing the headers first if needed.
    ///
    /// Requires a declared content length; pushing more bytes than
    /// declared latches an error. Undelivered declared bytes at handler
    /// exit force the connection to close.
    pub fn write_body(&mut self, src: &[u8]) -> Result<(), Error> {
        self.guard()?;

        if self.state != ResponseState::HeadersSent {
            if !self.content_length_set {
                log::error!("body written without a declared content-length");
                return Err(self.latch("content-length not set before body"));
            }
            self.flush_headers()?;
        }

        if src.len() > self.remaining_bytes {
            log::error!(
                "body exceeds the declared content-length of {}",
                self.content_length.unwrap_or(0)
            );
            return Err(self.latch("body exceeds declared content-length"));
        }

        self.send_raw(src)?;
        self.remaining_bytes -= src.len();
        Ok(())
    }
}

// Serialization internals
impl Response {
    #[inline]
    fn guard(&self) -> Result<(), Error> {
        match self.state {
            ResponseState::Error => Err(Error::ResponseOrderViolation("response in error state")),
            _ => Ok(()),
        }
    }

    #[inline]
    fn latch(&mut self, what: &'static str) -> Error {
        self.state = ResponseState::Error;
        Error::ResponseOrderViolation(what)
    }

    fn write_status_line(&mut self) -> Result<(), Error> {
        if self.status_code == 0 {
            log::error!("header written before a status code was set");
            return Err(self.latch("status code not set"));
        }

        self.push_bytes(b"HTTP/1.1 ")?;
        self.push_bytes(types::status_line(self.status_code).as_bytes())?;
        self.push_bytes(b"\r\n")?;
        self.state = ResponseState::StatusWritten;
        Ok(())
    }

    /// Copies `src` into the arena; overflow latches the error state.
    fn push_bytes(&mut self, src: &[u8]) -> Result<(), Error> {
        if self.arena.push(src).is_err() {
            log::error!("response header block exceeds {MAX_HEADER_SIZE} bytes");
            self.state = ResponseState::Error;
            return Err(Error::ResourceExhausted);
        }
        Ok(())
    }

    /// Copies `src` into the arena and returns a view of the copy.
    fn push_view(&mut self, src: &[u8]) -> Result<&'static [u8], Error> {
        let start = self.arena.size();
        self.push_bytes(src)?;
        // SAFETY: the view points into the response arena, which is fixed
        // and only rewound by `reset`, which also clears the header set
        // holding these views.
        Ok(unsafe { into_static(&self.arena.used()[start..start + src.len()]) })
    }

    /// Sends the first `len` arena bytes to the client.
    fn send(&mut self, len: usize) -> Result<(), Error> {
        let Some(client) = self.client.as_mut() else {
            self.state = ResponseState::Error;
            return Err(Error::SocketClosed);
        };

        let block = &self.arena.used()[..len];
        if let Err(e) = client.send_all(block) {
            log::error!("could not send the response header block: {e}");
            self.state = ResponseState::Error;
            return Err(e.into());
        }
        Ok(())
    }

    fn send_raw(&mut self, src: &[u8]) -> Result<(), Error> {
        let Some(client) = self.client.as_mut() else {
            self.state = ResponseState::Error;
            return Err(Error::SocketClosed);
        };

        if let Err(e) = client.send_all(src) {
            log::error!("could not send the response body: {e}");
            self.state = ResponseState::Error;
            return Err(e.into());
        }
        Ok(())
    }
}

// SAFETY: see `http::request::into_static`; identical contract against
// the response arena.
const unsafe fn into_static(src: &[u8]) -> &'static [u8] {
    unsafe { mem::transmute(src) }
}
