//! Monitoring consumer.
//!
//! Subscribes to the broker's monitor endpoint with an empty filter and
//! dispatches every mirrored message to a pluggable [`TrafficHandler`].
//! The baseline handler logs events; real analysis plugs in without touching
//! the broker.
//!
//! Delivery is at-most-once: the monitor channel drops messages to a
//! consumer that falls behind, so handlers must tolerate gaps.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::BackoffBuilder;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::socket::SubSocket;
use crate::utils::retry::connection_backoff;
use crate::wire::{Frame, Multipart};

/// Which way a mirrored message was travelling through the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Producer to worker (arrived on the frontend).
    In,
    /// Worker to producer (arrived on the backend).
    Out,
}

impl Direction {
    /// The tag frame prepended to mirrored messages.
    pub fn tag(&self) -> &'static [u8] {
        match self {
            Direction::In => b"in",
            Direction::Out => b"out",
        }
    }

    /// Parse a tag frame back into a direction.
    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"in" => Some(Direction::In),
            b"out" => Some(Direction::Out),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => f.write_str("in"),
            Direction::Out => f.write_str("out"),
        }
    }
}

/// Errors surfaced while consuming mirrored traffic.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("undecodable monitoring message: {0}")]
    Decode(String),

    #[error("traffic handler failed: {0}")]
    Handler(String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

/// One mirrored message: its direction and the forwarded frames.
#[derive(Debug, Clone)]
pub struct TrafficEvent {
    pub direction: Direction,
    pub frames: Vec<Frame>,
}

impl TrafficEvent {
    /// Decode a monitoring message: `[direction-tag, ...forwarded frames]`.
    pub fn decode(message: Multipart) -> Result<Self> {
        let mut frames = message.into_frames();
        if frames.is_empty() {
            return Err(MonitorError::Decode("empty monitoring message".into()));
        }
        let tag = frames.remove(0);
        let direction = Direction::from_tag(&tag).ok_or_else(|| {
            MonitorError::Decode(format!("unknown direction tag ({} bytes)", tag.len()))
        })?;
        Ok(Self { direction, frames })
    }

    /// Total payload bytes across the forwarded frames.
    pub fn total_bytes(&self) -> usize {
        self.frames.iter().map(|f| f.len()).sum()
    }

    /// Short hex preview of the payload (the last frame) for logging.
    pub fn preview(&self) -> String {
        match self.frames.last() {
            Some(frame) => {
                let shown = frame.len().min(32);
                if frame.len() > shown {
                    format!("{}...", hex::encode(&frame[..shown]))
                } else {
                    hex::encode(&frame[..shown])
                }
            }
            None => String::new(),
        }
    }
}

/// Pluggable analysis hook for mirrored traffic.
///
/// Handler failures are logged and do not stop the consumer.
#[async_trait]
pub trait TrafficHandler: Send + Sync {
    async fn handle(&self, event: TrafficEvent) -> Result<()>;
}

/// Default handler: logs each event.
pub struct LoggingHandler;

#[async_trait]
impl TrafficHandler for LoggingHandler {
    async fn handle(&self, event: TrafficEvent) -> Result<()> {
        debug!(
            direction = %event.direction,
            frames = event.frames.len(),
            bytes = event.total_bytes(),
            preview = %event.preview(),
            "Broker traffic"
        );
        Ok(())
    }
}

/// The monitoring consumer task.
pub struct TrafficMonitor {
    addr: String,
    handler: Arc<dyn TrafficHandler>,
}

impl TrafficMonitor {
    pub fn new(addr: impl Into<String>, handler: Arc<dyn TrafficHandler>) -> Self {
        Self {
            addr: addr.into(),
            handler,
        }
    }

    /// Consume mirrored traffic until the context is cancelled.
    ///
    /// The subscription is (re)established with exponential backoff — at
    /// startup the broker may not have bound its monitor endpoint yet.
    pub async fn run(self, ctx: Context) -> Result<()> {
        loop {
            let mut socket = match self.subscribe(&ctx).await {
                Some(socket) => socket,
                None => return Ok(()),
            };
            info!(addr = %self.addr, "Monitoring broker traffic");

            loop {
                tokio::select! {
                    _ = ctx.cancelled() => return Ok(()),
                    received = socket.recv() => match received {
                        Ok(message) => self.dispatch(message).await,
                        Err(e) => {
                            warn!(error = %e, "Monitor subscription lost, resubscribing");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Connect and subscribe with the empty filter (receive everything).
    ///
    /// Returns `None` if cancelled while waiting.
    async fn subscribe(&self, ctx: &Context) -> Option<SubSocket> {
        let mut delays = connection_backoff().build();
        loop {
            if ctx.is_shutdown() {
                return None;
            }
            match SubSocket::connect(&self.addr, b"").await {
                Ok(socket) => return Some(socket),
                Err(e) => {
                    let delay = delays.next().unwrap_or(Duration::from_secs(5));
                    debug!(error = %e, delay = ?delay, "Monitor endpoint not ready");
                    tokio::select! {
                        _ = ctx.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn dispatch(&self, message: Multipart) {
        match TrafficEvent::decode(message) {
            Ok(event) => {
                if let Err(e) = self.handler.handle(event).await {
                    warn!(error = %e, "Traffic handler failed");
                }
            }
            // Skip-and-log: one malformed message must not stop diagnostics.
            Err(e) => warn!(error = %e, "Skipping undecodable monitoring message"),
        }
    }
}
