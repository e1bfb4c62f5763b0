//! Streamed ICAP reply parsing.
//!
//! A reply is a mixed stream: one ICAP header block, optionally followed by
//! an embedded HTTP request and/or an embedded HTTP response. The reader is
//! line-oriented and classifies each line by its start-line shape, so the
//! embedded messages can arrive in any of the combinations the
//! `Encapsulated` header permits.

use http::header::{HeaderName, HeaderValue};
use http::{Request as HttpRequest, Response as HttpResponse, StatusCode, Version};
use tracing::{debug, trace};

use crate::error::{Error, IcapResult};
use crate::response::Response;
use crate::wire::{self, CRLF};
use crate::ICAP_VERSION;

/// Which message the reader is currently inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    None,
    Icap,
    HttpRequest,
    HttpResponse,
}

/// Line iterator that mimics a buffered `read_line`: yields each line with
/// its terminator, and a final unterminated line if the stream ends without
/// one.
struct Lines<'a> {
    rest: &'a [u8],
}

impl<'a> Lines<'a> {
    fn new(raw: &'a [u8]) -> Self {
        Lines { rest: raw }
    }

    fn next_line(&mut self) -> Option<&'a [u8]> {
        if self.rest.is_empty() {
            return None;
        }
        match self.rest.iter().position(|&b| b == b'\n') {
            Some(i) => {
                let (line, rest) = self.rest.split_at(i + 1);
                self.rest = rest;
                Some(line)
            }
            None => {
                let line = self.rest;
                self.rest = &[];
                Some(line)
            }
        }
    }

    fn drained(&self) -> bool {
        self.rest.is_empty()
    }
}

fn is_blank(line: &[u8]) -> bool {
    line == b"\r\n" || line == b"\n"
}

/// A line is a start-line candidate when one of its tokens carries a
/// protocol version.
fn is_start_line(text: &str) -> bool {
    text.split_whitespace()
        .any(|tok| tok == ICAP_VERSION || tok.starts_with("HTTP/"))
}

fn split_header(line: &str) -> (&str, &str) {
    match line.split_once(':') {
        Some((name, value)) => (name.trim(), value.trim()),
        None => (line.trim(), ""),
    }
}

fn http_version_from_str(s: &str) -> Version {
    match s {
        "HTTP/0.9" => Version::HTTP_09,
        "HTTP/1.0" => Version::HTTP_10,
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/2.0" => Version::HTTP_2,
        "HTTP/3.0" => Version::HTTP_3,
        _ => Version::HTTP_11,
    }
}

/// Parse a complete ICAP reply (ICAP headers plus any embedded HTTP
/// messages) into a [`Response`].
pub fn read_response(raw: &[u8]) -> IcapResult<Response> {
    trace!("read_response: len={}", raw.len());

    let mut resp = Response::default();
    let mut scheme = Scheme::None;
    let mut http_buf: Vec<u8> = Vec::new();
    let mut lines = Lines::new(raw);

    while let Some(line) = lines.next_line() {
        if let Ok(text) = std::str::from_utf8(line) {
            if is_start_line(text) {
                let tokens: Vec<&str> = text.split_whitespace().collect();
                // "ICAP/1.0 200 OK" or "GET /something HTTP/1.1"
                if tokens.len() < 3 {
                    return Err(Error::InvalidTcpMessage(text.trim_end().to_string()));
                }

                if tokens[0] == ICAP_VERSION {
                    scheme = Scheme::Icap;
                    resp.status_code = tokens[1]
                        .parse::<u16>()
                        .map_err(|_| Error::InvalidStatusCode(tokens[1].to_string()))?;
                    resp.status = tokens[2..].join(" ");
                    debug!("read_response: {} {}", resp.status_code, resp.status);
                    continue;
                }

                if tokens[0].starts_with("HTTP/") {
                    scheme = Scheme::HttpResponse;
                    http_buf.clear();
                } else if tokens[2].starts_with("HTTP/") {
                    // request start lines carry the version last
                    scheme = Scheme::HttpRequest;
                    http_buf.clear();
                }
            }
        }

        match scheme {
            Scheme::Icap => {
                if is_blank(line) {
                    continue;
                }
                let text = std::str::from_utf8(line)?;
                let (name, value) = split_header(text);
                if name.eq_ignore_ascii_case("Preview") {
                    resp.preview_bytes = value.parse().unwrap_or(0);
                }
                resp.headers.append(
                    HeaderName::from_bytes(name.as_bytes())?,
                    HeaderValue::from_str(value)?,
                );
            }
            Scheme::HttpRequest | Scheme::HttpResponse => {
                http_buf.extend_from_slice(line.trim_ascii());
                http_buf.extend_from_slice(CRLF);
                // a blank line ends the embedded headers; the drained check
                // covers streams whose last message ends without one
                if is_blank(line) || lines.drained() {
                    if scheme == Scheme::HttpRequest {
                        resp.content_request = Some(parse_embedded_request(&http_buf)?);
                    } else {
                        resp.content_response = Some(parse_embedded_response(&http_buf)?);
                    }
                }
            }
            Scheme::None => {}
        }
    }

    Ok(resp)
}

/// Materialize an embedded HTTP request. The body keeps the raw bytes that
/// followed the header block, chunked framing included.
fn parse_embedded_request(buf: &[u8]) -> IcapResult<HttpRequest<Vec<u8>>> {
    let head_end = wire::find_double_crlf(buf).unwrap_or(buf.len());
    let head = std::str::from_utf8(&buf[..head_end])?;

    let mut head_lines = head.split("\r\n");
    let start = head_lines
        .next()
        .ok_or_else(|| Error::http_parse("empty embedded request"))?;
    let mut parts = start.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| Error::http_parse("embedded request start line"))?;
    let uri = parts
        .next()
        .ok_or_else(|| Error::http_parse("embedded request start line"))?;
    let version = parts.next().unwrap_or("HTTP/1.1");

    let mut builder = HttpRequest::builder()
        .method(method)
        .uri(uri)
        .version(http_version_from_str(version));
    for line in head_lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            builder = builder.header(name.trim(), value.trim());
        }
    }

    builder
        .body(buf[head_end..].to_vec())
        .map_err(|e| Error::http_parse(e.to_string()))
}

/// Materialize an embedded HTTP response, same body convention as
/// [`parse_embedded_request`].
fn parse_embedded_response(buf: &[u8]) -> IcapResult<HttpResponse<Vec<u8>>> {
    let head_end = wire::find_double_crlf(buf).unwrap_or(buf.len());
    let head = std::str::from_utf8(&buf[..head_end])?;

    let mut head_lines = head.split("\r\n");
    let start = head_lines
        .next()
        .ok_or_else(|| Error::http_parse("empty embedded response"))?;
    let mut parts = start.split_whitespace();
    let version = parts
        .next()
        .ok_or_else(|| Error::http_parse("embedded response start line"))?;
    let code = parts
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| Error::http_parse("embedded response status code"))?;

    let mut builder = HttpResponse::builder()
        .status(StatusCode::from_u16(code).map_err(|e| Error::http_parse(e.to_string()))?)
        .version(http_version_from_str(version));
    for line in head_lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            builder = builder.header(name.trim(), value.trim());
        }
    }

    builder
        .body(buf[head_end..].to_vec())
        .map_err(|e| Error::http_parse(e.to_string()))
}
