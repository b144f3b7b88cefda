use std::{error, fmt, io};

/// Errors produced by the server, the servlet runtime and the builders.
///
/// Socket-level variants carry the classification of the operation that
/// failed so callers can tell a refused bind from a dead accept loop.
#[derive(Debug, PartialEq)]
pub enum Error {
    /// A configuration could not be applied (bad pool shape, server
    /// already started, missing builder component).
    ConfigInvalid(&'static str),

    /// An arena could not grow, or an allocation failed on accept.
    ResourceExhausted,

    SocketCreate(IoError),
    SocketConfig(IoError),
    SocketBind(IoError),
    SocketListen(IoError),
    SocketAccept(IoError),
    /// A receive or send timed out mid-connection.
    SocketTimeout,
    /// The peer closed the connection, or the listen socket was shut down.
    SocketClosed,

    /// Malformed status line, header overflow, oversized header section,
    /// undrained body or a token-count mismatch.
    ProtocolInvalid(&'static str),

    /// The response builder was driven out of order: header after body
    /// start, duplicate header, missing status code, or more body bytes
    /// than the declared content length.
    ResponseOrderViolation(&'static str),

    /// A handler or filter panicked; the connection was closed.
    HandlerPanic,
}

impl error::Error for Error {}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigInvalid(what) => write!(f, "invalid configuration: {what}"),
            Error::ResourceExhausted => write!(f, "out of memory"),
            Error::SocketCreate(e) => write!(f, "could not create socket: {}", e.0),
            Error::SocketConfig(e) => write!(f, "could not configure socket: {}", e.0),
            Error::SocketBind(e) => write!(f, "could not bind socket: {}", e.0),
            Error::SocketListen(e) => write!(f, "could not listen: {}", e.0),
            Error::SocketAccept(e) => write!(f, "could not accept client: {}", e.0),
            Error::SocketTimeout => write!(f, "socket operation timed out"),
            Error::SocketClosed => write!(f, "socket closed"),
            Error::ProtocolInvalid(what) => write!(f, "invalid HTTP request: {what}"),
            Error::ResponseOrderViolation(what) => write!(f, "response violation: {what}"),
            Error::HandlerPanic => write!(f, "handler panicked"),
        }
    }
}

impl From<io::Error> for Error {
    /// Mid-connection I/O failures collapse into the two kinds the accept
    /// loop distinguishes: timeout and closed.
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::SocketTimeout,
            _ => Error::SocketClosed,
        }
    }
}

/// `io::Error` wrapper comparable by kind, so error values stay `PartialEq`
/// for table-driven tests.
#[derive(Debug)]
pub struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for IoError {
    fn from(err: io::Error) -> Self {
        IoError(err)
    }
}
