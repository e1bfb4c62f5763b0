//! Typed ICAP reply.

use http::header::HeaderMap;
use http::HeaderValue;

use crate::error::IcapResult;
use crate::parser;

/// The ICAP server's reply: the ICAP-level status plus any embedded,
/// possibly modified, HTTP message.
///
/// A `204 No Modifications` reply is a success with both embedded messages
/// absent.
#[derive(Debug, Default)]
pub struct Response {
    pub status_code: u16,
    pub status: String,
    /// Value of the `Preview:` header when the server advertises one
    /// (OPTIONS replies); 0 otherwise.
    pub preview_bytes: usize,
    pub headers: HeaderMap,
    /// Embedded HTTP request, when the reply carried a `req-hdr` section.
    pub content_request: Option<http::Request<Vec<u8>>>,
    /// Embedded HTTP response, when the reply carried a `res-hdr` section.
    pub content_response: Option<http::Response<Vec<u8>>>,
}

impl Response {
    /// Parse a complete ICAP reply from raw bytes.
    pub fn from_raw(raw: &[u8]) -> IcapResult<Response> {
        parser::read_response(raw)
    }

    /// Get a reply header value.
    pub fn get_header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }
}
