//! HTTP request parsing with read-ahead accounting.

use crate::{
    bytes,
    config::MAX_HEADER_SIZE,
    errors::Error,
    http::types::{Header, HeaderSet},
    mem::Arena,
    server::Client,
};
use std::{io, mem};

/// A parsed HTTP/1.1 request.
///
/// All tokens (method, URI, header names and values) are zero-copy views
/// into the request's fixed arena; nothing is allocated per request. The
/// views stay valid until the worker resets the request for the next
/// connection.
///
/// Body bytes the OS delivered together with the headers are tracked as
/// *read-ahead* and handed out by [`recv_body`](Request::recv_body) before
/// any further socket read.
pub struct Request {
    arena: Arena,
    client: Option<Client>,

    method: &'static [u8],
    uri: &'static [u8],
    headers: HeaderSet,

    content_length: Option<usize>,
    remaining_content_length: usize,
    read_ahead_at: usize,
    read_ahead_len: usize,
    connection_close: bool,
}

impl Request {
    pub(crate) fn new() -> Self {
        Self {
            arena: Arena::fixed(MAX_HEADER_SIZE),
            client: None,
            method: b"",
            uri: b"",
            headers: HeaderSet::new(),
            content_length: None,
            remaining_content_length: 0,
            read_ahead_at: 0,
            read_ahead_len: 0,
            connection_close: false,
        }
    }

    /// Rebinds the request to a new client and clears all parsed state.
    pub(crate) fn reset(&mut self, client: Client) {
        self.arena.reset();
        self.client = Some(client);
        self.method = b"";
        self.uri = b"";
        self.headers.reset();
        self.content_length = None;
        self.remaining_content_length = 0;
        self.read_ahead_at = 0;
        self.read_ahead_len = 0;
        self.connection_close = false;
    }

    /// Releases the client handle so the connection can be reused or
    /// closed by the caller.
    pub(crate) fn detach(&mut self) -> Option<Client> {
        self.client.take()
    }
}

// Public API
impl Request {
    /// The request method, e.g. `b"GET"`.
    #[inline(always)]
    pub fn method(&self) -> &[u8] {
        self.method
    }

    /// The request URI exactly as sent, e.g. `b"/hello"`.
    #[inline(always)]
    pub fn uri(&self) -> &[u8] {
        self.uri
    }

    /// First header value whose name matches ASCII-case-insensitively.
    #[inline(always)]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// All headers in arrival order.
    #[inline]
    pub fn headers(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.headers.iter()
    }

    /// The advertised `Content-Length`, if any.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// Body bytes not yet consumed via [`recv_body`](Request::recv_body).
    #[inline(always)]
    pub const fn remaining_content_length(&self) -> usize {
        self.remaining_content_length
    }

    /// Whether the client asked for the connection to close.
    #[inline(always)]
    pub const fn connection_close(&self) -> bool {
        self.connection_close
    }

    /// Textual peer address captured at accept time.
    #[inline]
    pub fn peer_addr(&self) -> &str {
        self.client.as_ref().map(Client::address).unwrap_or("")
    }

    /// Reads body bytes: read-ahead first, then the socket.
    ///
    /// The read is clamped to the remaining content length. Returns
    /// `Ok(0)` once the body is drained or when the request advertised no
    /// `Content-Length`; socket failures (including read timeouts) are
    /// `Err`. A single call may deliver fewer bytes than requested.
    pub fn recv_body(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        if self.content_length.is_none() || self.remaining_content_length == 0 {
            return Ok(0);
        }

        let n = dest.len().min(self.remaining_content_length);
        if n == 0 {
            return Ok(0);
        }

        let mut delivered = 0;
        if self.read_ahead_len > 0 {
            let take = self.read_ahead_len.min(n);
            let ahead = &self.arena.used()[self.read_ahead_at..self.read_ahead_at + take];
            dest[..take].copy_from_slice(ahead);
            self.read_ahead_at += take;
            self.read_ahead_len -= take;
            delivered = take;
        }

        if delivered < n {
            let Some(client) = self.client.as_mut() else {
                return Err(io::Error::from(io::ErrorKind::NotConnected));
            };
            delivered += client.recv(&mut dest[delivered..n])?;
        }

        self.remaining_content_length -= delivered;
        Ok(delivered)
    }
}

// Header reading
impl Request {
    /// Drives the per-connection read state machine:
    ///
    /// ```text
    /// IDLE -> READING_STATUS -> READING_HEADERS -> BODY_READY
    ///                        \-> INVALID (connection closes)
    /// ```
    ///
    /// On success the request exposes its parsed tokens and the body
    /// read-ahead; on any error the caller closes the connection.
    pub(crate) fn read_headers(&mut self) -> Result<(), Error> {
        // One contiguous block holds the entire header section plus
        // whatever the OS handed us alongside it.
        self.arena.reserve(MAX_HEADER_SIZE)?;
        let mut bytes_read = 0;

        // Receive until the status line is complete.
        let status_line_len = loop {
            bytes_read += self.recv_into_block(bytes_read)?;
            if let Some(line) = bytes::read_line(&self.arena.used()[..bytes_read]) {
                break line.len();
            }
            if bytes_read >= MAX_HEADER_SIZE {
                log::info!("[{}] status line exceeds the header block", self.peer_addr());
                return Err(Error::ProtocolInvalid("status line too long"));
            }
        };

        self.parse_status_line(status_line_len)?;
        self.parse_header_lines(status_line_len + 1, bytes_read)
    }

    fn recv_into_block(&mut self, bytes_read: usize) -> Result<usize, Error> {
        let Some(client) = self.client.as_mut() else {
            return Err(Error::SocketClosed);
        };

        let block = &mut self.arena.used_mut()[bytes_read..];
        match client.recv(block) {
            Ok(0) => Err(Error::SocketClosed),
            Ok(count) => Ok(count),
            Err(e) => Err(e.into()),
        }
    }

    fn parse_status_line(&mut self, len: usize) -> Result<(), Error> {
        let line = &self.arena.used()[..len];
        if line.is_empty() {
            return Err(Error::ProtocolInvalid("status line is missing"));
        }

        let mut tokens: [&[u8]; 3] = [b""; 3];
        if bytes::split(line, b' ', &mut tokens) != 3 {
            log::info!("[{}] invalid request status line", self.peer_addr());
            return Err(Error::ProtocolInvalid("malformed status line"));
        }

        let version = bytes::rtrim(tokens[2]);
        if version != b"HTTP/1.1" {
            log::info!("[{}] unsupported HTTP version", self.peer_addr());
            return Err(Error::ProtocolInvalid("unsupported HTTP version"));
        }

        let method = bytes::rtrim(tokens[0]);
        let uri = bytes::rtrim(tokens[1]);
        if method.is_empty() || uri.is_empty() {
            return Err(Error::ProtocolInvalid("malformed status line"));
        }

        // SAFETY: both views point into the request arena, which is fixed
        // (it never grows or relocates) and is only rewound by `reset`,
        // which also clears these fields. Public accessors re-borrow at
        // `&self`, so no caller can hold a view across a reset.
        self.method = unsafe { into_static(method) };
        self.uri = unsafe { into_static(uri) };
        Ok(())
    }

    fn parse_header_lines(&mut self, mut pos: usize, mut bytes_read: usize) -> Result<(), Error> {
        loop {
            // Consume every complete line currently buffered.
            while let Some(line) = bytes::read_line(&self.arena.used()[pos..bytes_read]) {
                let line_len = line.len();

                if line.is_empty() || line == b"\r" {
                    // Header-body separator: whatever follows is body
                    // read-ahead.
                    pos += line_len + 1;
                    self.read_ahead_at = pos;
                    self.read_ahead_len = bytes_read - pos;
                    return Ok(());
                }

                self.parse_header_line(pos, line_len)?;
                pos += line_len + 1;
            }

            // The separator has not arrived yet; the block either has room
            // for more or the header section is oversized.
            if bytes_read >= MAX_HEADER_SIZE {
                log::info!(
                    "[{}] header section exceeds {MAX_HEADER_SIZE} bytes",
                    self.peer_addr()
                );
                return Err(Error::ProtocolInvalid("header section too large"));
            }
            bytes_read += self.recv_into_block(bytes_read)?;
        }
    }

    fn parse_header_line(&mut self, pos: usize, line_len: usize) -> Result<(), Error> {
        let line = &self.arena.used()[pos..pos + line_len];

        let mut parts: [&[u8]; 2] = [b""; 2];
        if bytes::split(line, b':', &mut parts) != 2 {
            log::info!("[{}] malformed header line", self.peer_addr());
            return Err(Error::ProtocolInvalid("malformed header"));
        }

        let name = bytes::trim(parts[0]);
        let value = bytes::trim(parts[1]);
        if name.is_empty() {
            return Err(Error::ProtocolInvalid("malformed header"));
        }

        // SAFETY: see `parse_status_line`; same arena, same reset rules.
        let header = Header {
            name: unsafe { into_static(name) },
            value: unsafe { into_static(value) },
        };
        if self.headers.push(header).is_err() {
            log::info!("[{}] too many request headers", self.peer_addr());
            return Err(Error::ProtocolInvalid("too many headers"));
        }

        if name.eq_ignore_ascii_case(b"Connection") {
            self.connection_close = value == b"close";
        } else if name.eq_ignore_ascii_case(b"Content-Length") {
            let (parsed, rest) = bytes::to_uint(value);
            let Some(length) = parsed.filter(|_| rest.is_empty()) else {
                return Err(Error::ProtocolInvalid("invalid content-length"));
            };
            let length = length as usize;
            self.content_length = Some(length);
            self.remaining_content_length = length;
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn arena_size(&self) -> usize {
        self.arena.size()
    }
}

// SAFETY: detaches a view from the arena borrow so it can be stored next
// to the arena itself. Callers guarantee the arena is fixed and the view
// is cleared before the arena is rewound.
const unsafe fn into_static(src: &[u8]) -> &'static [u8] {
    unsafe { mem::transmute(src) }
}
