//! Error handling
//!
//! This module defines:
//! - [`Error`]: the main error type for ICAP client operations.
//! - [`IcapResult<T>`]: a convenient alias for `Result<T, Error>`.
//!
//! It covers request construction errors, wire-level parsing failures and
//! transport errors.
use http::header::{InvalidHeaderName, InvalidHeaderValue};
use std::str::Utf8Error;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the client: construction errors detected before any
/// I/O, parsing failures on bytes received from the server, and transport
/// errors (dial, read/write, deadline).
#[derive(Error, Debug)]
pub enum Error {
    /// Network-level error (TCP connection, read/write, etc.).
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("Network timeout after {0:?}")]
    Timeout(Duration),

    /// The connection was used before `connect` or after `close`.
    #[error("Connection is not open")]
    NotConnected,

    /// The request URL scheme is not `icap`.
    #[error("The url scheme must be icap://")]
    InvalidScheme,

    /// The request URL host is missing or empty.
    #[error("The requested host is invalid")]
    InvalidHost,

    /// The ICAP method is not one of OPTIONS, REQMOD, RESPMOD.
    #[error("The requested method is not registered")]
    MethodNotAllowed,

    /// REQMOD requires an embedded HTTP request.
    #[error("HTTP request cannot be empty for method REQMOD")]
    ReqModWithoutRequest,

    /// REQMOD must not carry an embedded HTTP response.
    #[error("HTTP response must be empty for method REQMOD")]
    ReqModWithResponse,

    /// RESPMOD requires an embedded HTTP response.
    #[error("HTTP response cannot be empty for method RESPMOD")]
    RespModWithoutResponse,

    /// A start line in the reply stream had fewer than three tokens.
    #[error("Invalid tcp message: {0}")]
    InvalidTcpMessage(String),

    /// Invalid ICAP status code.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(String),

    /// Failed to parse an ICAP message.
    #[error("ICAP parsing error: {0}")]
    Parse(String),

    /// Failed to parse an embedded HTTP message.
    #[error("HTTP parsing error: {0}")]
    HttpParse(String),

    /// Invalid or malformed header.
    #[error("Header error: {0}")]
    Header(String),

    /// Two failures from the same exchange: the primary error plus the
    /// connection close that failed after it.
    #[error("{0}; close failed: {1}")]
    Joined(Box<Error>, Box<Error>),
}

impl Error {
    /// Create a parsing error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create an HTTP parsing error.
    pub fn http_parse(message: impl Into<String>) -> Self {
        Self::HttpParse(message.into())
    }

    /// Create a header error.
    pub fn header(message: impl Into<String>) -> Self {
        Self::Header(message.into())
    }
}

/// Convenient alias for results in the ICAP client.
pub type IcapResult<T> = Result<T, Error>;

impl From<Utf8Error> for Error {
    fn from(e: Utf8Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<InvalidHeaderName> for Error {
    fn from(e: InvalidHeaderName) -> Self {
        Error::Header(e.to_string())
    }
}

impl From<InvalidHeaderValue> for Error {
    fn from(e: InvalidHeaderValue) -> Self {
        Error::Header(e.to_string())
    }
}
