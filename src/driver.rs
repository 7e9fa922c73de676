//! Lockstep request driver.
//!
//! Feeds the broker frontend with numbered requests, one at a time: send
//! request `n`, wait for its reply, then send `n + 1`. At most one request
//! is in flight, so broker flow control is exercised continuously without
//! the driver ever buffering work.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::socket::{ReqSocket, SocketError};
use crate::wire::Multipart;

/// Request numbering starts at one.
pub const FIRST_REQUEST: u64 = 1;

/// Errors surfaced by the driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error("invalid request payload: {0}")]
    Payload(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// The dispatch payload: a sequence number and its capture timestamp.
///
/// The schema is fixed; payloads carrying extra fields are rejected rather
/// than silently accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub request: u64,
    pub captured: String,
}

impl Request {
    /// Build the payload for the given sequence number, capturing the
    /// current UTC time as RFC 3339 with second precision.
    pub fn new(request: u64) -> Self {
        Self {
            request,
            captured: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// Check the schema invariants: numbering starts at [`FIRST_REQUEST`]
    /// and the capture timestamp must be valid RFC 3339.
    pub fn validate(&self) -> Result<()> {
        if self.request < FIRST_REQUEST {
            return Err(DriverError::Payload(format!(
                "request number must be at least {FIRST_REQUEST}, got {}",
                self.request
            )));
        }
        DateTime::parse_from_rfc3339(&self.captured)
            .map_err(|e| DriverError::Payload(format!("invalid capture timestamp: {e}")))?;
        Ok(())
    }

    /// Serialize to the JSON wire form, validating first.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.validate()?;
        serde_json::to_vec(self).map_err(|e| DriverError::Payload(e.to_string()))
    }

    /// Parse and validate a JSON payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let request: Self =
            serde_json::from_slice(bytes).map_err(|e| DriverError::Payload(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }
}

/// The driver task: a single lockstep producer attached to the frontend.
pub struct DriverLoop {
    addr: String,
}

impl DriverLoop {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Dispatch numbered requests until the context is cancelled.
    ///
    /// A lost frontend connection is fatal: the broker lives in the same
    /// process, so the supervisor should tear everything down.
    pub async fn run(self, ctx: Context) -> Result<()> {
        let mut socket = ReqSocket::connect(&self.addr).await?;
        info!(addr = %self.addr, "Driving lockstep requests");

        let mut request_num = FIRST_REQUEST;
        loop {
            let payload = Request::new(request_num).to_bytes()?;
            debug!(request = request_num, "Dispatching request");

            let reply = tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                reply = socket.request(Multipart::single(Bytes::from(payload))) => reply?,
            };
            self.observe_reply(request_num, &reply);
            request_num += 1;
        }
    }

    /// Replies are opaque to the driver; any reply completes the cycle.
    /// Malformed ones are logged and do not stall the sequence.
    fn observe_reply(&self, request_num: u64, reply: &Multipart) {
        match reply.first() {
            Some(frame) => match serde_json::from_slice::<serde_json::Value>(frame) {
                Ok(value) => {
                    debug!(request = request_num, reply = %value, "Request acknowledged")
                }
                Err(_) => warn!(
                    request = request_num,
                    bytes = frame.len(),
                    "Discarding malformed reply payload"
                ),
            },
            None => warn!(request = request_num, "Discarding empty reply"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{read_multipart, write_multipart};
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    /// A bare replying peer: records each request number it sees and sends
    /// back whatever `reply_for` produces.
    async fn spawn_peer<F>(reply_for: F) -> (String, Arc<Mutex<Vec<u64>>>)
    where
        F: Fn(u64) -> Bytes + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            loop {
                let message = match read_multipart(&mut stream).await {
                    Ok(message) => message,
                    Err(_) => return,
                };
                let request = Request::from_bytes(message.first().unwrap()).unwrap();
                record.lock().unwrap().push(request.request);
                let reply = Multipart::single(reply_for(request.request));
                if write_multipart(&mut stream, &reply).await.is_err() {
                    return;
                }
            }
        });

        (addr, seen)
    }

    async fn wait_for_count(seen: &Arc<Mutex<Vec<u64>>>, count: usize) {
        for _ in 0..200 {
            if seen.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("peer never saw {count} requests: {:?}", seen.lock().unwrap());
    }

    #[test]
    fn test_request_round_trips() {
        let request = Request::new(7);
        let bytes = request.to_bytes().unwrap();
        assert_eq!(Request::from_bytes(&bytes).unwrap(), request);

        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(object["request"], 7);
        assert!(object["captured"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let bytes =
            br#"{"request": 1, "captured": "2024-01-01T00:00:00Z", "priority": "high"}"#;
        assert!(matches!(
            Request::from_bytes(bytes),
            Err(DriverError::Payload(_))
        ));
    }

    #[test]
    fn test_rejects_zero_request_number() {
        let bytes = br#"{"request": 0, "captured": "2024-01-01T00:00:00Z"}"#;
        assert!(matches!(
            Request::from_bytes(bytes),
            Err(DriverError::Payload(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_timestamp() {
        let request = Request {
            request: 1,
            captured: "yesterday at noon".into(),
        };
        assert!(matches!(request.validate(), Err(DriverError::Payload(_))));
        assert!(matches!(request.to_bytes(), Err(DriverError::Payload(_))));
    }

    #[tokio::test]
    async fn test_requests_are_strictly_sequential() {
        let (addr, seen) = spawn_peer(|n| {
            Bytes::from(serde_json::to_vec(&serde_json::json!({ "ack": n })).unwrap())
        })
        .await;

        let ctx = Context::new();
        let task = tokio::spawn(DriverLoop::new(addr).run(ctx.clone()));

        wait_for_count(&seen, 5).await;
        ctx.shutdown();
        timeout(Duration::from_secs(1), task)
            .await
            .expect("driver should stop on shutdown")
            .unwrap()
            .unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.len() >= 5);
        for (i, n) in seen.iter().enumerate() {
            assert_eq!(*n, FIRST_REQUEST + i as u64);
        }
    }

    #[tokio::test]
    async fn test_malformed_replies_do_not_stall_the_sequence() {
        let (addr, seen) = spawn_peer(|_| Bytes::from_static(b"not json at all")).await;

        let ctx = Context::new();
        let task = tokio::spawn(DriverLoop::new(addr).run(ctx.clone()));

        wait_for_count(&seen, 3).await;
        ctx.shutdown();
        timeout(Duration::from_secs(1), task)
            .await
            .expect("driver should stop on shutdown")
            .unwrap()
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(&seen[..3], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_lost_connection_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            // Accept and immediately drop the connection.
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let ctx = Context::new();
        let result = timeout(
            Duration::from_secs(1),
            DriverLoop::new(addr).run(ctx),
        )
        .await
        .expect("driver should fail fast");
        assert!(matches!(result, Err(DriverError::Socket(_))));
    }
}
