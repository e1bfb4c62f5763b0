//! Transport layer for the ICAP client.
//!
//! The protocol is connection-aware (preview continuations reuse the same
//! socket), so the client drives the transport through the [`Conn`]
//! capability instead of a bare stream. [`IcapConn`] is the plain-TCP
//! implementation; tests substitute in-memory doubles.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::error::{Error, IcapResult};
use crate::wire::{self, CHUNK_TERMINATOR, ICAP_100_CONTINUE_MSG, ICAP_204_NO_MODS_MSG};

/// One ICAP transport: dial once, exchange one request (two flights when a
/// preview is in play), close.
#[async_trait]
pub trait Conn: Send + Sync {
    /// Dial `address`. A timeout also installs an absolute deadline that
    /// bounds every later exchange on this connection.
    async fn connect(&self, address: &str, timeout: Option<Duration>) -> IcapResult<()>;

    /// Write `message` and read the server's reply until end-of-message.
    /// Returns the raw reply bytes.
    async fn send(&self, message: &[u8]) -> IcapResult<Vec<u8>>;

    /// Close the underlying socket.
    async fn close(&self) -> IcapResult<()>;
}

#[derive(Debug, Default)]
struct State {
    stream: Option<TcpStream>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

/// Plain-TCP [`Conn`]. A mutex serializes the whole exchange so callers
/// sharing a connection cannot interleave bytes.
#[derive(Debug, Default)]
pub struct IcapConn {
    state: Mutex<State>,
}

impl IcapConn {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Conn for IcapConn {
    async fn connect(&self, address: &str, timeout: Option<Duration>) -> IcapResult<()> {
        let mut state = self.state.lock().await;
        debug!("connect: {address} timeout={timeout:?}");

        let stream = match timeout {
            Some(t) => time::timeout(t, TcpStream::connect(address))
                .await
                .map_err(|_| Error::Timeout(t))??,
            None => TcpStream::connect(address).await?,
        };

        state.deadline = timeout.map(|t| Instant::now() + t);
        state.timeout = timeout;
        state.stream = Some(stream);
        Ok(())
    }

    async fn send(&self, message: &[u8]) -> IcapResult<Vec<u8>> {
        let mut state = self.state.lock().await;
        let timeout = state.timeout;
        let deadline = state.deadline;
        let stream = state.stream.as_mut().ok_or(Error::NotConnected)?;

        match deadline {
            Some(at) => time::timeout_at(at, exchange(stream, message))
                .await
                .map_err(|_| Error::Timeout(timeout.unwrap_or_default()))?,
            None => exchange(stream, message).await,
        }
    }

    async fn close(&self) -> IcapResult<()> {
        let mut state = self.state.lock().await;
        let mut stream = state.stream.take().ok_or(Error::NotConnected)?;
        stream.shutdown().await?;
        Ok(())
    }
}

/// Write the payload while reading the reply into a growing buffer. Both
/// halves run concurrently and are joined before returning, with the first
/// error winning; the server may start replying before the write finishes.
async fn exchange(stream: &mut TcpStream, message: &[u8]) -> IcapResult<Vec<u8>> {
    let (mut reader, mut writer) = stream.split();

    let write_side = async {
        writer.write_all(message).await?;
        writer.flush().await?;
        Ok::<(), Error>(())
    };

    let read_side = async {
        let mut data: Vec<u8> = Vec::new();
        let mut tmp = [0u8; 1024];
        loop {
            let n = reader.read(&mut tmp).await?;
            // EOF: an entire message has been received
            if n == 0 {
                break;
            }
            data.extend_from_slice(&tmp[..n]);

            // a bare 100 Continue means the server is waiting for the
            // client to speak next; reading further would block
            if data == ICAP_100_CONTINUE_MSG {
                break;
            }
            // zero chunk terminates the encapsulated body
            if data.ends_with(CHUNK_TERMINATOR) {
                break;
            }
            // 204 replies carry no encapsulated content
            if wire::contains(&data, ICAP_204_NO_MODS_MSG) {
                break;
            }
        }
        trace!("exchange: read {} reply bytes", data.len());
        Ok::<Vec<u8>, Error>(data)
    };

    let ((), data) = tokio::try_join!(write_side, read_side)?;
    Ok(data)
}
