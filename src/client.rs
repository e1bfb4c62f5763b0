//! The ICAP client: one request per connection, preview handshake
//! included.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, IcapResult};
use crate::message;
use crate::net::{Conn, IcapConn};
use crate::parser;
use crate::request::Request;
use crate::response::Response;
use crate::wire::{self, CRLF, DOUBLE_CRLF};

/// Options for the ICAP client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Bound on the whole conversation: the dial and every read and write
    /// that follows on the connection. `None` disables the deadline.
    pub timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            timeout: Some(wire::DEFAULT_TIMEOUT),
        }
    }
}

/// Client for a single ICAP exchange. Each [`send`](Client::send) dials the
/// request's host, performs the exchange (two flights when a preview
/// remainder is outstanding) and closes the socket.
pub struct Client {
    conn: Arc<dyn Conn>,
    opts: ClientOptions,
}

impl Client {
    pub fn new(opts: ClientOptions) -> Self {
        Client {
            conn: Arc::new(IcapConn::new()),
            opts,
        }
    }

    /// Build a client over a custom transport. Tests use this to substitute
    /// in-memory connections.
    pub fn with_conn(conn: Arc<dyn Conn>, opts: ClientOptions) -> Self {
        Client { conn, opts }
    }

    /// Serialize the request in its ICAP wire form without sending it.
    pub fn get_request(&self, req: &Request) -> IcapResult<Vec<u8>> {
        message::to_icap_message(req)
    }

    /// Send the request and return the parsed reply.
    ///
    /// The request is consumed: a connection is good for one exchange and
    /// the preview handshake mutates the request's accounting.
    pub async fn send(&self, mut req: Request) -> IcapResult<Response> {
        self.conn
            .connect(&req.authority(), self.opts.timeout)
            .await?;

        let result = self.round_trip(&mut req).await;
        let close_result = self.conn.close().await;

        // the close always runs and its error is never dropped
        match (result, close_result) {
            (Ok(resp), Ok(())) => Ok(resp),
            (Ok(_), Err(close)) => Err(close),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close)) => Err(Error::Joined(Box::new(err), Box::new(close))),
        }
    }

    async fn round_trip(&self, req: &mut Request) -> IcapResult<Response> {
        req.set_default_headers();

        let message = message::to_icap_message(req)?;
        let raw = self.conn.send(&message).await?;
        let resp = parser::read_response(&raw)?;

        // anything other than "100 Continue while a preview remainder is
        // outstanding" ends the exchange
        let done = !(resp.status_code == 100 && !req.body_fitted_in_preview && req.preview_set);
        if done {
            return Ok(resp);
        }

        debug!(
            "round_trip: 100 Continue, sending {} remainder bytes",
            req.remaining_preview_bytes.len()
        );

        let mut remainder = req.remaining_preview_bytes.clone();
        if !wire::ends_with_chunk_tail(&remainder) {
            remainder = wire::add_hex_body_byte_notations(&remainder);
        }
        if !remainder.ends_with(DOUBLE_CRLF) {
            remainder.extend_from_slice(CRLF);
        }

        let raw = self.conn.send(&remainder).await?;
        parser::read_response(&raw)
    }
}
