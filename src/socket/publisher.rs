//! Monitor publish socket.
//!
//! One-to-many fan-out with per-subscriber prefix filtering. Delivery is
//! at-most-once and lossy by contract: a subscriber that falls behind has
//! messages dropped rather than slowing the publisher, and every drop is
//! counted. Nothing here blocks on a subscriber.
//!
//! A subscriber announces itself with a single handshake message whose first
//! frame is its filter; an empty filter receives everything. Messages match
//! when their first frame starts with the filter bytes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::wire::{self, Multipart};

use super::{Result, SocketError};

/// Queue depth per subscriber before messages are dropped.
const SUBSCRIBER_CAPACITY: usize = 1024;

struct Subscriber {
    id: Uuid,
    filter: Bytes,
    tx: mpsc::Sender<Multipart>,
}

impl Subscriber {
    fn matches(&self, message: &Multipart) -> bool {
        if self.filter.is_empty() {
            return true;
        }
        message
            .first()
            .map(|frame| frame.starts_with(&self.filter))
            .unwrap_or(false)
    }
}

type Subscribers = Arc<RwLock<Vec<Subscriber>>>;

/// The monitor endpoint: publishes to all matching subscribers.
pub struct PubSocket {
    local_addr: SocketAddr,
    subscribers: Subscribers,
    dropped: Arc<AtomicU64>,
    accept_task: JoinHandle<()>,
}

impl PubSocket {
    /// Bind to `addr` and start accepting subscribers.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SocketError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let subscribers: Subscribers = Arc::new(RwLock::new(Vec::new()));
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&subscribers)));
        debug!(addr = %local_addr, "Publisher listening");

        Ok(Self {
            local_addr,
            subscribers,
            dropped: Arc::new(AtomicU64::new(0)),
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Messages dropped so far because a subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Publish a message to every subscriber whose filter matches.
    ///
    /// Never waits: full subscriber queues drop the message for that
    /// subscriber.
    pub async fn publish(&self, message: Multipart) {
        let subscribers = self.subscribers.read().await;
        for subscriber in subscribers.iter() {
            if !subscriber.matches(&message) {
                continue;
            }
            match subscriber.tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(subscriber = %subscriber.id, "Dropping message for slow subscriber");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }
}

impl Drop for PubSocket {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, subscribers: Subscribers) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                tokio::spawn(handle_subscriber(stream, remote, Arc::clone(&subscribers)));
            }
            Err(e) => warn!(error = %e, "Accept failed on publisher endpoint"),
        }
    }
}

/// Complete the filter handshake, then register the subscriber.
async fn handle_subscriber(
    stream: TcpStream,
    remote: SocketAddr,
    subscribers: Subscribers,
) {
    let (mut read_half, write_half) = stream.into_split();
    let filter = match wire::read_multipart(&mut read_half).await {
        Ok(handshake) => handshake.first().cloned().unwrap_or_default(),
        Err(e) => {
            debug!(remote = %remote, error = %e, "Subscriber handshake failed");
            return;
        }
    };

    let id = Uuid::new_v4();
    debug!(subscriber = %id, remote = %remote, filter_len = filter.len(), "Subscriber joined");
    let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
    subscribers.write().await.push(Subscriber { id, filter, tx });

    tokio::spawn(write_subscriber(id, write_half, rx, Arc::clone(&subscribers)));
    tokio::spawn(watch_subscriber(id, read_half, subscribers));
}

async fn write_subscriber(
    id: Uuid,
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Multipart>,
    subscribers: Subscribers,
) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = wire::write_multipart(&mut write_half, &message).await {
            debug!(subscriber = %id, error = %e, "Write to subscriber failed");
            break;
        }
    }
    subscribers.write().await.retain(|s| s.id != id);
}

/// Drain the read side so an idle subscriber's disconnect is noticed promptly.
async fn watch_subscriber(id: Uuid, mut read_half: OwnedReadHalf, subscribers: Subscribers) {
    let mut buf = [0u8; 64];
    loop {
        match read_half.read(&mut buf).await {
            // Subscribers do not speak after the handshake; stray bytes are
            // ignored.
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
    debug!(subscriber = %id, "Subscriber disconnected");
    subscribers.write().await.retain(|s| s.id != id);
}
