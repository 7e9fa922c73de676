//! Backend dealer socket.
//!
//! Accepts many worker connections and deals outbound messages round-robin
//! among them. Each worker's send queue holds a single message (send
//! high-water mark 1): when every connected worker is busy, or none is
//! connected yet, `send` waits until capacity appears, propagating
//! backpressure to the caller instead of buffering. Replies from all workers
//! are merged into one inbound stream.
//!
//! A message already queued for a worker that disconnects before delivery is
//! lost, as with any dealt queue.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::wire::{self, Multipart};

use super::{Result, SocketError};

/// Outbound queue depth per worker (send high-water mark).
const SEND_HWM: usize = 1;

/// Merged reply queue depth.
const RECEIVE_CAPACITY: usize = 1;

struct WorkerPeer {
    id: Uuid,
    tx: mpsc::Sender<Multipart>,
}

type Peers = Arc<RwLock<Vec<WorkerPeer>>>;

/// The backend endpoint: deals to workers, merges their replies.
pub struct DealerSocket {
    local_addr: SocketAddr,
    inbound_rx: mpsc::Receiver<Multipart>,
    peers: Peers,
    /// Signalled when a worker connects or frees send capacity.
    available: Arc<Notify>,
    cursor: usize,
    accept_task: JoinHandle<()>,
}

impl DealerSocket {
    /// Bind to `addr` and start accepting workers.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SocketError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let peers: Peers = Arc::new(RwLock::new(Vec::new()));
        let available = Arc::new(Notify::new());
        let (inbound_tx, inbound_rx) = mpsc::channel(RECEIVE_CAPACITY);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            inbound_tx,
            Arc::clone(&peers),
            Arc::clone(&available),
        ));
        debug!(addr = %local_addr, "Dealer listening");

        Ok(Self {
            local_addr,
            inbound_rx,
            peers,
            available,
            cursor: 0,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently connected workers.
    pub async fn worker_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Receive the next merged reply.
    ///
    /// Returns `None` once the socket has shut down.
    pub async fn recv(&mut self) -> Option<Multipart> {
        self.inbound_rx.recv().await
    }

    /// Deal a message to the next worker with free capacity.
    ///
    /// Scans round-robin from the last dealt worker; when all queues are full
    /// or no worker is connected, waits until one becomes available.
    pub async fn send(&mut self, message: Multipart) {
        loop {
            // Register interest before scanning so a wakeup between the scan
            // and the await is not lost.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let peers = self.peers.read().await;
                if !peers.is_empty() {
                    let n = peers.len();
                    let start = self.cursor % n;
                    for offset in 0..n {
                        let idx = (start + offset) % n;
                        match peers[idx].tx.try_reserve() {
                            Ok(permit) => {
                                permit.send(message);
                                self.cursor = idx + 1;
                                return;
                            }
                            Err(TrySendError::Full(())) => continue,
                            Err(TrySendError::Closed(())) => continue,
                        }
                    }
                }
            }

            notified.await;
        }
    }
}

impl Drop for DealerSocket {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    inbound_tx: mpsc::Sender<Multipart>,
    peers: Peers,
    available: Arc<Notify>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                let id = Uuid::new_v4();
                debug!(peer = %id, remote = %remote, "Worker connected");
                let (read_half, write_half) = stream.into_split();
                let (out_tx, out_rx) = mpsc::channel(SEND_HWM);
                peers.write().await.push(WorkerPeer { id, tx: out_tx });
                available.notify_waiters();
                tokio::spawn(read_worker(
                    id,
                    read_half,
                    inbound_tx.clone(),
                    Arc::clone(&peers),
                    Arc::clone(&available),
                ));
                tokio::spawn(write_worker(
                    id,
                    write_half,
                    out_rx,
                    Arc::clone(&available),
                ));
            }
            Err(e) => warn!(error = %e, "Accept failed on dealer endpoint"),
        }
    }
}

async fn read_worker(
    id: Uuid,
    mut read_half: OwnedReadHalf,
    inbound_tx: mpsc::Sender<Multipart>,
    peers: Peers,
    available: Arc<Notify>,
) {
    loop {
        match wire::read_multipart(&mut read_half).await {
            Ok(message) => {
                if inbound_tx.send(message).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(peer = %id, error = %e, "Worker disconnected");
                break;
            }
        }
    }
    peers.write().await.retain(|p| p.id != id);
    // Wake any sender scanning for capacity so it re-evaluates the peer set.
    available.notify_waiters();
}

async fn write_worker(
    id: Uuid,
    mut write_half: OwnedWriteHalf,
    mut out_rx: mpsc::Receiver<Multipart>,
    available: Arc<Notify>,
) {
    while let Some(message) = out_rx.recv().await {
        let result = wire::write_multipart(&mut write_half, &message).await;
        // Delivery finished one way or the other; the queue slot is free.
        available.notify_waiters();
        if let Err(e) = result {
            debug!(peer = %id, error = %e, "Write to worker failed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    async fn wait_for_workers(dealer: &DealerSocket, n: usize) {
        for _ in 0..100 {
            if dealer.worker_count().await == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("worker count never reached {n}");
    }

    #[tokio::test]
    async fn test_deals_round_robin_across_workers() {
        let mut dealer = DealerSocket::bind("127.0.0.1:0").await.unwrap();
        let mut first = TcpStream::connect(dealer.local_addr()).await.unwrap();
        wait_for_workers(&dealer, 1).await;
        let mut second = TcpStream::connect(dealer.local_addr()).await.unwrap();
        wait_for_workers(&dealer, 2).await;

        for i in 0u8..4 {
            dealer.send(Multipart::single(vec![i])).await;
        }

        let mut seen_first = Vec::new();
        let mut seen_second = Vec::new();
        for _ in 0..2 {
            seen_first.push(wire::read_multipart(&mut first).await.unwrap());
            seen_second.push(wire::read_multipart(&mut second).await.unwrap());
        }

        // Two each, in dealt order within a worker.
        assert_eq!(seen_first.len(), 2);
        assert_eq!(seen_second.len(), 2);
        let mut all: Vec<u8> = seen_first
            .iter()
            .chain(seen_second.iter())
            .map(|m| m.frames()[0][0])
            .collect();
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_send_waits_for_a_worker() {
        let mut dealer = DealerSocket::bind("127.0.0.1:0").await.unwrap();

        // No workers: send must not complete.
        let blocked = timeout(
            Duration::from_millis(50),
            dealer.send(Multipart::single(Bytes::from_static(b"stalled"))),
        )
        .await;
        assert!(blocked.is_err());

        // Once a worker connects, sending completes promptly.
        let mut worker = TcpStream::connect(dealer.local_addr()).await.unwrap();
        wait_for_workers(&dealer, 1).await;
        timeout(
            Duration::from_secs(1),
            dealer.send(Multipart::single(Bytes::from_static(b"delivered"))),
        )
        .await
        .expect("send should complete once a worker is available");

        let delivered = wire::read_multipart(&mut worker).await.unwrap();
        assert_eq!(delivered, Multipart::single(Bytes::from_static(b"delivered")));
    }

    #[tokio::test]
    async fn test_merges_worker_replies() {
        let mut dealer = DealerSocket::bind("127.0.0.1:0").await.unwrap();
        let mut first = TcpStream::connect(dealer.local_addr()).await.unwrap();
        let mut second = TcpStream::connect(dealer.local_addr()).await.unwrap();
        wait_for_workers(&dealer, 2).await;

        wire::write_multipart(&mut first, &Multipart::single(Bytes::from_static(b"a")))
            .await
            .unwrap();
        wire::write_multipart(&mut second, &Multipart::single(Bytes::from_static(b"b")))
            .await
            .unwrap();

        let mut seen = vec![
            dealer.recv().await.unwrap().frames()[0].clone(),
            dealer.recv().await.unwrap().frames()[0].clone(),
        ];
        seen.sort();
        assert_eq!(seen, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
    }
}
