//! Serialization of a composite ICAP message: the embedded HTTP dumps, the
//! `Encapsulated` offset computation and the final wire assembly.

use std::fmt::Write as _;

use http::header::HOST;
use http::{Request as HttpRequest, Response as HttpResponse, Version};
use tracing::{debug, trace};

use crate::error::IcapResult;
use crate::request::{Method, Request};
use crate::wire::{self, CRLF, DOUBLE_CRLF, FULL_BODY_IN_PREVIEW_INDICATOR};
use crate::ICAP_VERSION;

pub(crate) fn http_version_str(v: Version) -> &'static str {
    match v {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

/// Absolute-form request target for the embedded request line. Adaptation
/// services expect the full URL, not the origin-form the client would put
/// on the wire to the origin server.
fn absolute_target(req: &HttpRequest<Vec<u8>>) -> String {
    let uri = req.uri();
    let mut path = uri.path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(q) = uri.query() {
        path.push('?');
        path.push_str(q);
    }

    if let Some(scheme) = uri.scheme_str() {
        let authority = uri.authority().map(|a| a.as_str()).unwrap_or_default();
        return format!("{scheme}://{authority}{path}");
    }

    match req.headers().get(HOST).and_then(|v| v.to_str().ok()) {
        Some(host) => format!("http://{host}{path}"),
        None => path,
    }
}

/// Serialize an embedded HTTP request to its canonical byte form.
pub(crate) fn dump_http_request(req: &HttpRequest<Vec<u8>>) -> Vec<u8> {
    let mut out = String::new();
    write!(
        &mut out,
        "{} {} {}\r\n",
        req.method(),
        absolute_target(req),
        http_version_str(req.version())
    )
    .unwrap();
    for (name, value) in req.headers().iter() {
        write!(
            &mut out,
            "{}: {}\r\n",
            wire::canonical_header(name.as_str()),
            value.to_str().unwrap_or_default()
        )
        .unwrap();
    }
    out.push_str("\r\n");
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(req.body());
    bytes
}

/// Serialize an embedded HTTP response to its canonical byte form.
pub(crate) fn dump_http_response(resp: &HttpResponse<Vec<u8>>) -> Vec<u8> {
    let mut out = String::new();
    let code = resp.status();
    write!(
        &mut out,
        "{} {} {}\r\n",
        http_version_str(resp.version()),
        code.as_u16(),
        code.canonical_reason().unwrap_or("")
    )
    .unwrap();
    for (name, value) in resp.headers().iter() {
        write!(
            &mut out,
            "{}: {}\r\n",
            wire::canonical_header(name.as_str()),
            value.to_str().unwrap_or_default()
        )
        .unwrap();
    }
    out.push_str("\r\n");
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(resp.body());
    bytes
}

/// Compute the `Encapsulated` header value from the two dumped HTTP blocks.
///
/// Offsets are byte positions into `req_bytes || resp_bytes`, found by
/// scanning each block for double-CRLF section boundaries. The value is
/// emitted with a single leading space; some servers in the field expect
/// that exact shape.
pub(crate) fn encapsulated_header_value(
    method: Method,
    req_bytes: &[u8],
    resp_bytes: &[u8],
) -> String {
    let mut value = String::from(" ");

    if method == Method::Options {
        if req_bytes.is_empty() && resp_bytes.is_empty() {
            value.push_str("null-body=0");
        } else {
            value.push_str("opt-body=0");
        }
        return value;
    }

    let req_ends = wire::double_crlf_ends(req_bytes);
    let mut req_ends_at = 0;

    if !req_ends.is_empty() {
        value.push_str("req-hdr=0");
        req_ends_at = req_ends[0];

        // a second boundary means the request block carries a body
        if req_ends.len() > 1 {
            write!(&mut value, ", req-body={}", req_ends[0]).unwrap();
            req_ends_at = req_ends[1];
        } else if resp_bytes.is_empty() {
            write!(&mut value, ", null-body={}", req_ends[0]).unwrap();
        }

        if !resp_bytes.is_empty() {
            value.push_str(", ");
        }
    }

    let resp_ends = wire::double_crlf_ends(resp_bytes);
    if !resp_ends.is_empty() {
        write!(&mut value, "res-hdr={req_ends_at}").unwrap();
        if resp_ends.len() > 1 {
            write!(&mut value, ", res-body={}", req_ends_at + resp_ends[0]).unwrap();
        } else {
            write!(&mut value, ", null-body={}", req_ends_at + resp_ends[0]).unwrap();
        }
    }

    value
}

/// `0\r\n\r\n` at the tail of a preview body becomes `0; ieof\r\n\r\n`,
/// telling the server the preview is the entire body.
fn add_full_body_in_preview_indicator(block: &mut Vec<u8>) {
    if block.ends_with(DOUBLE_CRLF) {
        block.truncate(block.len() - DOUBLE_CRLF.len());
    }
    block.extend_from_slice(FULL_BODY_IN_PREVIEW_INDICATOR);
}

/// Serialize the request in its ICAP/1.0 wire form.
pub(crate) fn to_icap_message(req: &Request) -> IcapResult<Vec<u8>> {
    trace!("to_icap_message: {} {}", req.method, req.url);

    let mut head = String::new();
    write!(&mut head, "{} {} {}\r\n", req.method, req.url, ICAP_VERSION).unwrap();

    for (name, value) in req.headers.iter() {
        // emitted separately, with the override value if the caller set one
        if name == "encapsulated" {
            continue;
        }
        write!(
            &mut head,
            "{}: {}\r\n",
            wire::canonical_header(name.as_str()),
            value.to_str().unwrap_or_default()
        )
        .unwrap();
    }

    // build the HTTP request block
    let mut http_req_bytes = Vec::new();
    if let Some(http_req) = &req.http_request {
        http_req_bytes = dump_http_request(http_req);

        if req.method == Method::ReqMod {
            if req.preview_set {
                http_req_bytes = wire::parse_preview_body_bytes(&http_req_bytes, req.preview_bytes);
            }
            if !wire::body_already_chunked(&http_req_bytes) {
                if let Some((header, body)) = wire::split_header_body(&http_req_bytes) {
                    let chunked = wire::add_hex_body_byte_notations(body);
                    http_req_bytes = wire::merge_header_and_body(header, &chunked);
                }
            }
        }

        wire::pad_to_double_crlf(&mut http_req_bytes);
    }

    // build the HTTP response block
    let mut http_resp_bytes = Vec::new();
    if let Some(http_resp) = &req.http_response {
        http_resp_bytes = dump_http_response(http_resp);

        if req.preview_set {
            http_resp_bytes = wire::parse_preview_body_bytes(&http_resp_bytes, req.preview_bytes);
        }
        if !wire::body_already_chunked(&http_resp_bytes) {
            if let Some((header, body)) = wire::split_header_body(&http_resp_bytes) {
                let chunked = wire::add_hex_body_byte_notations(body);
                http_resp_bytes = wire::merge_header_and_body(header, &chunked);
            }
        }

        if !http_resp_bytes.ends_with(DOUBLE_CRLF) {
            http_resp_bytes.extend_from_slice(CRLF);
        }
    }

    let encapsulated = match req.headers.get("Encapsulated") {
        Some(v) => v.to_str().unwrap_or_default().to_string(),
        None => encapsulated_header_value(req.method, &http_req_bytes, &http_resp_bytes),
    };
    debug!("to_icap_message: Encapsulated:{encapsulated}");
    write!(&mut head, "Encapsulated: {encapsulated}\r\n").unwrap();
    head.push_str("\r\n");

    if !http_resp_bytes.is_empty() && req.preview_set && req.body_fitted_in_preview {
        add_full_body_in_preview_indicator(&mut http_resp_bytes);
    }
    if req.method == Method::ReqMod && req.preview_set && req.body_fitted_in_preview {
        add_full_body_in_preview_indicator(&mut http_req_bytes);
    }

    let mut data = head.into_bytes();
    data.extend_from_slice(&http_req_bytes);
    data.extend_from_slice(&http_resp_bytes);
    Ok(data)
}
