//! Wire primitives shared by the serializer, the reply parser and the
//! connection: protocol constants and the small byte-level helpers the
//! framing rules are built from.

use std::time::Duration;

pub(crate) const CRLF: &[u8] = b"\r\n";
pub(crate) const DOUBLE_CRLF: &[u8] = b"\r\n\r\n";

/// Terminating chunk of a chunked body, as it appears at the end of a
/// fully-sent message.
pub(crate) const CHUNK_TERMINATOR: &[u8] = b"0\r\n\r\n";
/// Suffix appended when wrapping a plain body into a single chunk.
pub(crate) const BODY_END_INDICATOR: &[u8] = b"\r\n0\r\n";
/// Replaces the trailing double CRLF when the whole body fitted in the
/// preview: the last chunk becomes `0; ieof\r\n\r\n`.
pub(crate) const FULL_BODY_IN_PREVIEW_INDICATOR: &[u8] = b"; ieof\r\n\r\n";

pub(crate) const ICAP_100_CONTINUE_MSG: &[u8] = b"ICAP/1.0 100 Continue\r\n\r\n";
pub(crate) const ICAP_204_NO_MODS_MSG: &[u8] = b"ICAP/1.0 204 Unmodified";

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Position just past the first `\r\n\r\n`, if any.
#[inline]
pub(crate) fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == DOUBLE_CRLF).map(|i| i + 4)
}

/// End offsets (position just past the match) of every non-overlapping
/// `\r\n\r\n` in `buf`, in order.
pub(crate) fn double_crlf_ends(buf: &[u8]) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut i = 0;
    while i + 4 <= buf.len() {
        if &buf[i..i + 4] == DOUBLE_CRLF {
            ends.push(i + 4);
            i += 4;
        } else {
            i += 1;
        }
    }
    ends
}

pub(crate) fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Split an HTTP message at the first double CRLF. `None` when there is no
/// header/body boundary or the body is empty.
pub(crate) fn split_header_body(msg: &[u8]) -> Option<(&[u8], &[u8])> {
    let end = find_double_crlf(msg)?;
    let header = &msg[..end - 4];
    let body = &msg[end..];
    if body.is_empty() {
        return None;
    }
    Some((header, body))
}

pub(crate) fn merge_header_and_body(header: &[u8], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(header.len() + 4 + body.len());
    out.extend_from_slice(header);
    out.extend_from_slice(DOUBLE_CRLF);
    out.extend_from_slice(body);
    out
}

/// Wrap a plain body into a single chunk: `<hex-len>\r\n<body>\r\n0\r\n`.
/// The hex length carries no padding and is lowercase.
pub(crate) fn add_hex_body_byte_notations(body: &[u8]) -> Vec<u8> {
    let prefix = format!("{:x}\r\n", body.len());
    let mut out = Vec::with_capacity(prefix.len() + body.len() + BODY_END_INDICATOR.len());
    out.extend_from_slice(prefix.as_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(BODY_END_INDICATOR);
    out
}

/// Trailing `\r\n0(\r\n)+` check: the origin already chunk-encoded this
/// body, so the serializer must leave it alone.
pub(crate) fn ends_with_chunk_tail(body: &[u8]) -> bool {
    let mut end = body.len();
    let mut stripped = 0usize;
    while end >= 2 && &body[end - 2..end] == CRLF {
        end -= 2;
        stripped += 1;
    }
    stripped >= 1 && end >= 3 && &body[end - 3..end] == b"\r\n0"
}

/// Whether the body part of an HTTP message is already chunked.
pub(crate) fn body_already_chunked(msg: &[u8]) -> bool {
    match split_header_body(msg) {
        Some((_, body)) => ends_with_chunk_tail(body),
        None => false,
    }
}

/// Keep only the first `n` body bytes of an HTTP message. Idempotent when
/// `n` covers the whole body; messages without a body pass through.
pub(crate) fn parse_preview_body_bytes(msg: &[u8], n: usize) -> Vec<u8> {
    match split_header_body(msg) {
        Some((header, body)) => merge_header_and_body(header, &body[..n.min(body.len())]),
        None => msg.to_vec(),
    }
}

/// Append CRLF until the block ends with a double CRLF. The Encapsulated
/// offset arithmetic requires every section to end on one.
pub(crate) fn pad_to_double_crlf(buf: &mut Vec<u8>) {
    while !buf.ends_with(DOUBLE_CRLF) {
        buf.extend_from_slice(CRLF);
    }
}

/// Wire casing for a header name. `http::HeaderName` stores names
/// lowercased; on output every hyphenated segment gets its first letter
/// capitalized, which is the canonical form of all RFC 3507 headers except
/// the three with irregular capitalization.
pub(crate) fn canonical_header(name: &str) -> String {
    match name {
        "istag" => "ISTag".into(),
        "options-ttl" => "Options-TTL".into(),
        "service-id" => "Service-ID".into(),
        _ => name
            .split('-')
            .map(|segment| {
                let mut chars = segment.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join("-"),
    }
}
