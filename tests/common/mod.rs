//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;

use drover::config::{CacheConfig, Config};
use drover::driver::Request;
use drover::monitor::{Result as MonitorResult, TrafficEvent, TrafficHandler};
use drover::socket::RepSocket;
use drover::wire::Multipart;

// ===== Test Fixtures =====

/// Configuration bound to ephemeral loopback ports.
pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        frontend_port: 0,
        backend_port: 0,
        monitoring_port: 0,
        ..Config::default()
    }
}

/// Like [`test_config`], with the cache rooted under `dir`.
pub fn test_config_with_cache(dir: &Path) -> Config {
    Config {
        cache: CacheConfig {
            path: dir.join("cache").to_string_lossy().into_owned(),
        },
        ..test_config()
    }
}

/// A loopback port that was free a moment ago.
///
/// For tests that need to know an address before the component binds it.
pub fn free_port() -> u16 {
    free_ports::<1>()[0]
}

/// N distinct loopback ports that were free a moment ago.
///
/// The reserving listeners are held together so the same port is never
/// handed out twice.
pub fn free_ports<const N: usize>() -> [u16; N] {
    let reserved: Vec<std::net::TcpListener> = (0..N)
        .map(|_| std::net::TcpListener::bind("127.0.0.1:0").expect("reserve port"))
        .collect();
    let mut ports = [0u16; N];
    for (port, listener) in ports.iter_mut().zip(&reserved) {
        *port = listener.local_addr().expect("listener addr").port();
    }
    ports
}

/// Poll `predicate` until it holds or `deadline` passes.
pub async fn wait_until(predicate: impl Fn() -> bool, deadline: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    predicate()
}

/// Connect a worker to the backend, retrying while the endpoint comes up.
pub async fn connect_worker(addr: &str) -> RepSocket {
    for _ in 0..200 {
        if let Ok(socket) = RepSocket::connect(addr).await {
            return socket;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("backend endpoint never came up at {addr}");
}

/// Worker that acknowledges dispatch requests and echoes opaque payloads,
/// recording every request number it acknowledges.
pub fn spawn_recording_worker(addr: String) -> (Arc<Mutex<Vec<u64>>>, JoinHandle<()>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let handle = tokio::spawn(async move {
        let mut socket = connect_worker(&addr).await;
        loop {
            let message = match socket.recv().await {
                Ok(message) => message,
                Err(_) => return,
            };
            let reply = match message.first().map(|frame| Request::from_bytes(frame)) {
                Some(Ok(request)) => {
                    record.lock().unwrap().push(request.request);
                    ack(request.request)
                }
                _ => message.clone(),
            };
            if socket.send(reply).await.is_err() {
                return;
            }
        }
    });
    (seen, handle)
}

/// Worker that records request numbers but answers with a payload that is
/// not JSON.
pub fn spawn_scrambling_worker(addr: String) -> (Arc<Mutex<Vec<u64>>>, JoinHandle<()>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let handle = tokio::spawn(async move {
        let mut socket = connect_worker(&addr).await;
        loop {
            let message = match socket.recv().await {
                Ok(message) => message,
                Err(_) => return,
            };
            if let Some(Ok(request)) = message.first().map(|frame| Request::from_bytes(frame)) {
                record.lock().unwrap().push(request.request);
            }
            let reply = Multipart::single(Bytes::from_static(b"%%scrambled%%"));
            if socket.send(reply).await.is_err() {
                return;
            }
        }
    });
    (seen, handle)
}

fn ack(request: u64) -> Multipart {
    let payload = serde_json::json!({ "ack": request });
    Multipart::single(Bytes::from(serde_json::to_vec(&payload).expect("ack payload")))
}

/// Traffic handler that counts events and records them in arrival order.
pub struct CountingHandler {
    count: AtomicUsize,
    pub events: Mutex<Vec<TrafficEvent>>,
}

impl CountingHandler {
    pub fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Events handled so far; once this reads `n`, the first `n` events are
    /// visible in `events`.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrafficHandler for CountingHandler {
    async fn handle(&self, event: TrafficEvent) -> MonitorResult<()> {
        self.events.lock().unwrap().push(event);
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
