//! Monitor subscribe socket (consumer side).
//!
//! Connects to a publisher, announces a filter, then receives matching
//! messages. An empty filter receives everything. Delivery is at-most-once:
//! messages published while this subscriber is behind may never arrive.

use bytes::Bytes;
use tokio::net::TcpStream;
use tracing::debug;

use crate::wire::{self, Multipart};

use super::{Result, SocketError};

/// A connected, filtered subscription to a publish endpoint.
pub struct SubSocket {
    stream: TcpStream,
}

impl SubSocket {
    /// Connect to the publisher at `addr` and subscribe with `filter`.
    pub async fn connect(addr: &str, filter: &[u8]) -> Result<Self> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|source| SocketError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        wire::write_multipart(
            &mut stream,
            &Multipart::single(Bytes::copy_from_slice(filter)),
        )
        .await?;
        debug!(addr = %addr, filter_len = filter.len(), "Subscribed");
        Ok(Self { stream })
    }

    /// Receive the next published message matching the filter.
    pub async fn recv(&mut self) -> Result<Multipart> {
        Ok(wire::read_multipart(&mut self.stream).await?)
    }
}
