//! Producer request socket.
//!
//! Connects to the frontend and exchanges messages in strict lockstep: one
//! request out, one reply back, enforced by the exclusive borrow on
//! [`ReqSocket::request`]. There is no reply timeout; callers that need
//! bounded waits race the call against their own deadline or stop signal.

use tokio::net::TcpStream;
use tracing::debug;

use crate::wire::{self, Multipart};

use super::{Result, SocketError};

/// A lockstep request/reply connection to the frontend.
pub struct ReqSocket {
    stream: TcpStream,
}

impl ReqSocket {
    /// Connect to the frontend at `addr`.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| SocketError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        debug!(addr = %addr, "Producer connected to frontend");
        Ok(Self { stream })
    }

    /// Send one request and wait for its reply.
    ///
    /// Lockstep correlation: the reply returned is the reply to this request,
    /// because no second request can be in flight.
    pub async fn request(&mut self, message: Multipart) -> Result<Multipart> {
        wire::write_multipart(&mut self.stream, &message).await?;
        Ok(wire::read_multipart(&mut self.stream).await?)
    }
}
