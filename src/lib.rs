#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

pub mod client;
pub mod error;
mod message;
pub mod net;
pub mod parser;
pub mod request;
pub mod response;
mod wire;

pub use client::{Client, ClientOptions};
pub use error::{Error, IcapResult};
pub use request::{Method, Request};
pub use response::Response;

/// Lib version
pub const LIB_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Supported ICAP protocol version.
pub const ICAP_VERSION: &str = "ICAP/1.0";
/// HTTP version used for embedded request start lines.
pub const HTTP_VERSION: &str = "HTTP/1.1";
/// Port dialed when the ICAP URL does not carry one.
pub const DEFAULT_ICAP_PORT: u16 = 1344;
