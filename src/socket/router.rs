//! Frontend router socket.
//!
//! Accepts many producer connections. Each inbound message is stamped with a
//! 16-byte identity frame naming the originating connection so the reply can
//! find its way back; outbound messages must carry that identity as their
//! first frame, and it is stripped before delivery. Routing never blocks:
//! messages addressed to a peer that has gone away are dropped, as router
//! semantics require, and a peer that has stopped reading its replies has
//! further messages dropped and counted once its lane is full.
//!
//! The inbound queue is shared across all producers and holds a single
//! message: while the consumer has not taken the previous message, peer
//! readers stop reading their connections and backpressure propagates to the
//! producers over TCP.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::wire::{self, Multipart};

use super::{Result, SocketError};

/// Inbound queue depth shared across all producers (receive high-water mark).
const RECEIVE_HWM: usize = 1;

/// Outbound queue depth per producer.
const SEND_CAPACITY: usize = 1;

type Peers = Arc<RwLock<HashMap<Uuid, mpsc::Sender<Multipart>>>>;

/// The frontend endpoint: routes by identity, receives from all producers.
pub struct RouterSocket {
    local_addr: SocketAddr,
    inbound_rx: mpsc::Receiver<Multipart>,
    peers: Peers,
    dropped: Arc<AtomicU64>,
    accept_task: JoinHandle<()>,
}

impl RouterSocket {
    /// Bind to `addr` and start accepting producers.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SocketError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let peers: Peers = Arc::new(RwLock::new(HashMap::new()));
        let (inbound_tx, inbound_rx) = mpsc::channel(RECEIVE_HWM);
        let accept_task = tokio::spawn(accept_loop(listener, inbound_tx, Arc::clone(&peers)));
        debug!(addr = %local_addr, "Router listening");

        Ok(Self {
            local_addr,
            inbound_rx,
            peers,
            dropped: Arc::new(AtomicU64::new(0)),
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Messages dropped so far because a producer stopped reading replies.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Receive the next inbound message: `[identity, ...producer frames]`.
    ///
    /// Returns `None` once the socket has shut down.
    pub async fn recv(&mut self) -> Option<Multipart> {
        self.inbound_rx.recv().await
    }

    /// Route a message to the peer named by its first frame.
    ///
    /// The identity frame is stripped and the remaining frames are delivered
    /// verbatim. Routing never waits: unroutable messages (malformed
    /// identity, departed peer) are dropped, and a peer whose lane is full
    /// because it stopped reading replies has the message dropped and
    /// counted rather than parking the caller.
    pub async fn send(&self, message: Multipart) {
        let mut frames = message.into_frames();
        if frames.is_empty() {
            warn!("Dropping outbound message with no identity frame");
            return;
        }
        let identity = frames.remove(0);
        let id = match Uuid::from_slice(&identity) {
            Ok(id) => id,
            Err(_) => {
                warn!("Dropping outbound message with malformed identity frame");
                return;
            }
        };

        let tx = self.peers.read().await.get(&id).cloned();
        match tx {
            Some(tx) => match tx.try_send(Multipart::from_frames(frames)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(peer = %id, "Dropping message for stalled producer");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(peer = %id, "Dropping message for departed producer");
                }
            },
            None => debug!(peer = %id, "Dropping message for unknown producer"),
        }
    }
}

impl Drop for RouterSocket {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, inbound_tx: mpsc::Sender<Multipart>, peers: Peers) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                let id = Uuid::new_v4();
                debug!(peer = %id, remote = %remote, "Producer connected");
                let (read_half, write_half) = stream.into_split();
                let (out_tx, out_rx) = mpsc::channel(SEND_CAPACITY);
                peers.write().await.insert(id, out_tx);
                tokio::spawn(read_peer(
                    id,
                    read_half,
                    inbound_tx.clone(),
                    Arc::clone(&peers),
                ));
                tokio::spawn(write_peer(id, write_half, out_rx));
            }
            Err(e) => warn!(error = %e, "Accept failed on router endpoint"),
        }
    }
}

/// Stamp each message from this producer with its identity and queue it.
///
/// Awaiting queue capacity here is the backpressure path: while the consumer
/// holds an untaken message, no further reads happen on any producer
/// connection.
async fn read_peer(
    id: Uuid,
    mut read_half: OwnedReadHalf,
    inbound_tx: mpsc::Sender<Multipart>,
    peers: Peers,
) {
    loop {
        match wire::read_multipart(&mut read_half).await {
            Ok(message) => {
                let mut frames = Vec::with_capacity(message.len() + 1);
                frames.push(Bytes::copy_from_slice(id.as_bytes()));
                frames.extend(message.into_frames());
                if inbound_tx.send(Multipart::from_frames(frames)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(peer = %id, error = %e, "Producer disconnected");
                break;
            }
        }
    }
    peers.write().await.remove(&id);
}

async fn write_peer(id: Uuid, mut write_half: OwnedWriteHalf, mut out_rx: mpsc::Receiver<Multipart>) {
    while let Some(message) = out_rx.recv().await {
        if let Err(e) = wire::write_multipart(&mut write_half, &message).await {
            debug!(peer = %id, error = %e, "Write to producer failed");
            break;
        }
    }
}
