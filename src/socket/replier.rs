//! Worker reply socket.
//!
//! Connects to the backend. Every message dealt to a worker carries the
//! routing envelope stamped by the frontend router as its first frame;
//! [`RepSocket::recv`] strips and holds that envelope, and
//! [`RepSocket::send`] reattaches it so the reply is routed back to the
//! producer that asked. Workers never handle identity frames themselves.
//!
//! Strict alternation: a reply without a pending request is a protocol
//! violation; receiving again before replying abandons the previous
//! envelope (that producer will never see a reply).

use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::wire::{self, Frame, Multipart};

use super::{Result, SocketError};

/// A worker's connection to the backend.
pub struct RepSocket {
    stream: TcpStream,
    pending: Option<Frame>,
}

impl RepSocket {
    /// Connect to the backend at `addr`.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| SocketError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        debug!(addr = %addr, "Worker connected to backend");
        Ok(Self {
            stream,
            pending: None,
        })
    }

    /// Receive the next request payload, holding its routing envelope for
    /// the reply.
    pub async fn recv(&mut self) -> Result<Multipart> {
        let message = wire::read_multipart(&mut self.stream).await?;
        let mut frames = message.into_frames();
        if frames.is_empty() {
            return Err(SocketError::Protocol("request without routing envelope"));
        }
        if self.pending.is_some() {
            warn!("Abandoning envelope of an un-replied request");
        }
        self.pending = Some(frames.remove(0));
        Ok(Multipart::from_frames(frames))
    }

    /// Reply to the most recently received request.
    pub async fn send(&mut self, reply: Multipart) -> Result<()> {
        let envelope = self
            .pending
            .take()
            .ok_or(SocketError::Protocol("reply without a pending request"))?;
        let mut frames = Vec::with_capacity(reply.len() + 1);
        frames.push(envelope);
        frames.extend(reply.into_frames());
        wire::write_multipart(&mut self.stream, &Multipart::from_frames(frames)).await?;
        Ok(())
    }
}
