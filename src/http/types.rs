//! Shared HTTP types: headers, header sets and the status-code mapping.

use crate::config::MAX_HEADERS_COUNT;
use arrayvec::ArrayVec;

/// Maps a status code to the `<code> <reason>` fragment of the status line.
///
/// The table is deliberately small; any code outside it maps to
/// `418 I'm a teapot`. The teapot fallback is intentional and observable:
/// a handler that sets an unmapped code gets the teapot on the wire, which
/// makes a missing mapping impossible to miss in development.
#[inline]
pub(crate) const fn status_line(code: u16) -> &'static str {
    match code {
        200 => "200 OK",
        400 => "400 Bad Request",
        404 => "404 Not Found",
        _ => "418 I'm a teapot",
    }
}

/// One parsed header: zero-copy views into the owning arena.
///
/// The `'static` lifetimes are a promise kept by the `Request`/`Response`
/// that owns the arena, not by the type system; see the safety note on
/// `into_static` in `http::request`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Header {
    pub(crate) name: &'static [u8],
    pub(crate) value: &'static [u8],
}

/// Ordered, bounded collection of headers.
///
/// Backed by an `ArrayVec` so the hot path never reallocates; capacity is
/// [`MAX_HEADERS_COUNT`] and `push` fails instead of growing.
#[derive(Debug, Default)]
pub(crate) struct HeaderSet {
    headers: ArrayVec<Header, MAX_HEADERS_COUNT>,
}

impl HeaderSet {
    #[inline(always)]
    pub(crate) fn new() -> Self {
        Self {
            headers: ArrayVec::new(),
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.headers.clear();
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.headers.len()
    }

    /// Appends a header; fails when the set is full.
    #[inline]
    pub(crate) fn push(&mut self, header: Header) -> Result<(), ()> {
        self.headers.try_push(header).map_err(|_| ())
    }

    /// First value whose name matches ASCII-case-insensitively
    /// (per RFC 9110 field-name matching). Linear search.
    #[inline]
    pub(crate) fn get(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value)
    }

    /// Whether a header with this exact (byte-compared) name exists.
    #[inline]
    pub(crate) fn contains_exact(&self, name: &[u8]) -> bool {
        self.headers.iter().any(|h| h.name == name)
    }

    #[inline]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.headers.iter().map(|h| (h.name, h.value))
    }
}
