//! ICAP request construction and preview accounting.
//!
//! A [`Request`] carries the ICAP method and URL, the ICAP headers, and up
//! to two embedded HTTP messages. It is created once, optionally mutated
//! (preview allocation, header extension from an OPTIONS reply) and then
//! consumed by [`Client::send`](crate::Client::send).

use std::fmt;
use std::str::FromStr;

use http::header::{self, HeaderMap, HeaderValue};
use http::Uri;
use once_cell::sync::Lazy;

use crate::error::{Error, IcapResult};
use crate::DEFAULT_ICAP_PORT;

/// Hostname for the default `Host:` header, read once per process. When the
/// node name is unavailable the header is omitted.
static LOCAL_HOSTNAME: Lazy<Option<String>> = Lazy::new(|| {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
});

/// The three ICAP request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Query service capabilities.
    Options,
    /// Ask the server to inspect/modify an outbound HTTP request.
    ReqMod,
    /// Ask the server to inspect/modify an inbound HTTP response.
    RespMod,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::ReqMod => "REQMOD",
            Method::RespMod => "RESPMOD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPTIONS" => Ok(Method::Options),
            "REQMOD" => Ok(Method::ReqMod),
            "RESPMOD" => Ok(Method::RespMod),
            _ => Err(Error::MethodNotAllowed),
        }
    }
}

/// An ICAP request: method, service URL, ICAP headers and the embedded
/// HTTP message(s) to adapt.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub url: Uri,
    pub headers: HeaderMap,
    pub http_request: Option<http::Request<Vec<u8>>>,
    pub http_response: Option<http::Response<Vec<u8>>>,
    pub(crate) preview_bytes: usize,
    pub(crate) preview_set: bool,
    pub(crate) body_fitted_in_preview: bool,
    pub(crate) remaining_preview_bytes: Vec<u8>,
}

impl Request {
    /// Build a request, validating the method/embedded-message combination.
    ///
    /// The method is given by its wire name and must be one of `OPTIONS`,
    /// `REQMOD`, `RESPMOD`. The URL must have scheme `icap` and a non-empty
    /// host; the path is the ICAP service name. `REQMOD` requires an
    /// embedded HTTP request and forbids a response; `RESPMOD` requires a
    /// response; `OPTIONS` takes either or none.
    pub fn new(
        method: &str,
        url: &str,
        http_request: Option<http::Request<Vec<u8>>>,
        http_response: Option<http::Response<Vec<u8>>>,
    ) -> IcapResult<Request> {
        let method: Method = method.parse()?;
        let url: Uri = url.parse().map_err(|_| Error::InvalidHost)?;

        if url.scheme_str() != Some("icap") {
            return Err(Error::InvalidScheme);
        }
        if url.host().map_or(true, str::is_empty) {
            return Err(Error::InvalidHost);
        }

        match method {
            Method::ReqMod => {
                if http_request.is_none() {
                    return Err(Error::ReqModWithoutRequest);
                }
                if http_response.is_some() {
                    return Err(Error::ReqModWithResponse);
                }
            }
            Method::RespMod => {
                if http_response.is_none() {
                    return Err(Error::RespModWithoutResponse);
                }
            }
            Method::Options => {}
        }

        Ok(Request {
            method,
            url,
            headers: HeaderMap::new(),
            http_request,
            http_response,
            preview_bytes: 0,
            preview_set: false,
            body_fitted_in_preview: false,
            remaining_preview_bytes: Vec::new(),
        })
    }

    /// Allocate up to `n` preview bytes from the embedded body.
    ///
    /// Sets the `Preview:` header to the number of bytes actually allocated
    /// and stashes whatever did not fit for the second flight of the
    /// 100-Continue handshake. The embedded body itself is left intact.
    pub fn set_preview(&mut self, n: usize) -> IcapResult<()> {
        let body: &[u8] = match self.method {
            Method::RespMod => self
                .http_response
                .as_ref()
                .map(|r| r.body().as_slice())
                .unwrap_or_default(),
            _ => self
                .http_request
                .as_ref()
                .map(|r| r.body().as_slice())
                .unwrap_or_default(),
        };

        let allocated = n.min(body.len());
        self.remaining_preview_bytes = body[allocated..].to_vec();
        self.body_fitted_in_preview = body.len() <= n;
        self.preview_bytes = allocated;
        self.preview_set = true;

        let value = HeaderValue::from_str(&allocated.to_string())?;
        self.headers.insert("Preview", value);
        Ok(())
    }

    /// Merge another header map into the request headers. Values are
    /// appended, never replaced, so an OPTIONS reply can extend a request
    /// without clobbering what the caller already set.
    pub fn extend_header(&mut self, other: &HeaderMap) {
        for (name, value) in other.iter() {
            self.headers.append(name.clone(), value.clone());
        }
    }

    /// Number of preview bytes allocated by [`set_preview`](Self::set_preview).
    pub fn preview_bytes(&self) -> usize {
        self.preview_bytes
    }

    /// Whether the whole embedded body fitted into the requested preview.
    pub fn body_fitted_in_preview(&self) -> bool {
        self.body_fitted_in_preview
    }

    /// Body bytes held back from the first flight.
    pub fn remaining_preview_bytes(&self) -> &[u8] {
        &self.remaining_preview_bytes
    }

    /// `host:port` to dial, defaulting to the well-known ICAP port.
    pub(crate) fn authority(&self) -> String {
        let host = self.url.host().unwrap_or_default();
        match self.url.port_u16() {
            Some(port) => format!("{host}:{port}"),
            None => format!("{host}:{DEFAULT_ICAP_PORT}"),
        }
    }

    /// Add `Allow: 204` and `Host:` when the caller did not set them.
    pub(crate) fn set_default_headers(&mut self) {
        if !self.headers.contains_key(header::ALLOW) {
            self.headers
                .insert(header::ALLOW, HeaderValue::from_static("204"));
        }
        if !self.headers.contains_key(header::HOST) {
            if let Some(name) = LOCAL_HOSTNAME.as_ref() {
                if let Ok(value) = HeaderValue::from_str(name) {
                    self.headers.insert(header::HOST, value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options_request() -> Request {
        Request::new("OPTIONS", "icap://localhost:1344/something", None, None).unwrap()
    }

    #[test]
    fn default_headers_fill_allow_and_host() {
        let mut req = options_request();
        req.set_default_headers();

        assert_eq!(req.headers.get(header::ALLOW).unwrap(), "204");
        if let Some(name) = LOCAL_HOSTNAME.as_ref() {
            assert_eq!(req.headers.get(header::HOST).unwrap(), name.as_str());
        }
    }

    #[test]
    fn default_headers_never_override_caller_values() {
        let mut req = options_request();
        req.headers
            .insert(header::HOST, HeaderValue::from_static("somehost"));
        req.set_default_headers();

        assert_eq!(req.headers.get(header::HOST).unwrap(), "somehost");
    }

    #[test]
    fn authority_defaults_the_icap_port() {
        let req = options_request();
        assert_eq!(req.authority(), "localhost:1344");

        let req = Request::new("OPTIONS", "icap://icap.example.net/scan", None, None).unwrap();
        assert_eq!(req.authority(), "icap.example.net:1344");
    }

    #[test]
    fn method_parsing() {
        assert_eq!("REQMOD".parse::<Method>().unwrap(), Method::ReqMod);
        assert_eq!("RESPMOD".parse::<Method>().unwrap(), Method::RespMod);
        assert_eq!("OPTIONS".parse::<Method>().unwrap(), Method::Options);
        assert!(matches!(
            "invalid".parse::<Method>(),
            Err(crate::Error::MethodNotAllowed)
        ));
    }
}
