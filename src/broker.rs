//! The monitored queue broker.
//!
//! Owns the three endpoints — frontend for producers, backend for workers,
//! monitor for observers — and moves messages between them. Every forwarded
//! message is mirrored to the monitor endpoint, tagged `in` or `out`, before
//! it is forwarded.
//!
//! The broker holds no queue of its own. The frontend admits one unread
//! message and each worker lane holds one undelivered message; beyond that,
//! producers block. What the endpoints hold in flight is the only buffering
//! there is, so monitoring reflects real traffic rather than queue growth.
//! Replies travel the other way without blocking: a producer that stops
//! reading has its replies dropped rather than stalling the loop for
//! everyone else.

use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;
use crate::context::Context;
use crate::monitor::Direction;
use crate::socket::{DealerSocket, PubSocket, RouterSocket, SocketError};
use crate::wire::{Frame, Multipart};

/// Errors surfaced by the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to bind {role} endpoint {addr}: {source}")]
    Bind {
        role: &'static str,
        addr: String,
        source: SocketError,
    },

    #[error("{0} endpoint closed unexpectedly")]
    Forward(&'static str),
}

pub type Result<T> = std::result::Result<T, BrokerError>;

/// The broker: frontend and backend queues plus the traffic mirror.
pub struct Broker {
    frontend: RouterSocket,
    backend: DealerSocket,
    monitor: PubSocket,
}

impl Broker {
    /// Bind all three endpoints from the configuration.
    ///
    /// Any port may be zero; the actual addresses are reported by the
    /// accessors below so dependents can be pointed at them.
    pub async fn bind(config: &Config) -> Result<Self> {
        let frontend = RouterSocket::bind(&config.frontend_addr())
            .await
            .map_err(|source| BrokerError::Bind {
                role: "frontend",
                addr: config.frontend_addr(),
                source,
            })?;
        let backend = DealerSocket::bind(&config.backend_addr())
            .await
            .map_err(|source| BrokerError::Bind {
                role: "backend",
                addr: config.backend_addr(),
                source,
            })?;
        let monitor = PubSocket::bind(&config.monitoring_addr())
            .await
            .map_err(|source| BrokerError::Bind {
                role: "monitor",
                addr: config.monitoring_addr(),
                source,
            })?;

        info!(
            frontend = %frontend.local_addr(),
            backend = %backend.local_addr(),
            monitor = %monitor.local_addr(),
            "Broker endpoints bound"
        );
        Ok(Self {
            frontend,
            backend,
            monitor,
        })
    }

    /// Actual frontend address (useful when configured with port zero).
    pub fn frontend_addr(&self) -> std::net::SocketAddr {
        self.frontend.local_addr()
    }

    /// Actual backend address.
    pub fn backend_addr(&self) -> std::net::SocketAddr {
        self.backend.local_addr()
    }

    /// Actual monitor address.
    pub fn monitor_addr(&self) -> std::net::SocketAddr {
        self.monitor.local_addr()
    }

    /// Currently subscribed monitoring consumers.
    pub async fn monitor_subscribers(&self) -> usize {
        self.monitor.subscriber_count().await
    }

    /// Monitoring messages dropped on slow consumers so far.
    pub fn monitor_drops(&self) -> u64 {
        self.monitor.dropped()
    }

    /// Replies dropped so far because a producer stopped reading them.
    pub fn frontend_drops(&self) -> u64 {
        self.frontend.dropped()
    }

    /// Forward messages between the endpoints until cancelled.
    ///
    /// Each message is mirrored before it is forwarded, so a held-back
    /// message (no worker capacity) is already visible to monitoring while
    /// the broker waits. Forwarding to the backend blocks until a worker
    /// lane has room, which is what pushes back on producers; a forward
    /// parked there still honors cancellation, and the held message is
    /// discarded on shutdown. Forwarding replies to the frontend never
    /// blocks: the router drops a reply its producer will not read.
    pub async fn run(mut self, ctx: Context) -> Result<()> {
        info!("Broker running");
        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                inbound = self.frontend.recv() => {
                    let message = inbound.ok_or(BrokerError::Forward("frontend"))?;
                    debug!(frames = message.len(), "Forwarding inbound message");
                    self.mirror(Direction::In, &message).await;
                    tokio::select! {
                        _ = ctx.cancelled() => break,
                        _ = self.backend.send(message) => {}
                    }
                }
                outbound = self.backend.recv() => {
                    let message = outbound.ok_or(BrokerError::Forward("backend"))?;
                    debug!(frames = message.len(), "Forwarding outbound reply");
                    self.mirror(Direction::Out, &message).await;
                    self.frontend.send(message).await;
                }
            }
        }
        info!("Broker stopped");
        Ok(())
    }

    /// Publish a tagged copy of the message to the monitor endpoint.
    /// Mirroring is best-effort; it never blocks forwarding.
    async fn mirror(&self, direction: Direction, message: &Multipart) {
        let mut mirrored = Vec::with_capacity(message.len() + 1);
        mirrored.push(Frame::from_static(direction.tag()));
        mirrored.extend(message.frames().iter().cloned());
        self.monitor.publish(Multipart::from_frames(mirrored)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn loopback_config() -> Config {
        Config {
            host: "127.0.0.1".into(),
            frontend_port: 0,
            backend_port: 0,
            monitoring_port: 0,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_bind_reports_actual_addresses() {
        let broker = Broker::bind(&loopback_config()).await.unwrap();
        assert_ne!(broker.frontend_addr().port(), 0);
        assert_ne!(broker.backend_addr().port(), 0);
        assert_ne!(broker.monitor_addr().port(), 0);
        assert_eq!(broker.monitor_subscribers().await, 0);
        assert_eq!(broker.monitor_drops(), 0);
        assert_eq!(broker.frontend_drops(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_names_the_role() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = Config {
            frontend_port: taken.local_addr().unwrap().port(),
            ..loopback_config()
        };

        match Broker::bind(&config).await {
            Err(BrokerError::Bind { role, .. }) => assert_eq!(role, "frontend"),
            Err(other) => panic!("expected a frontend bind error, got {other:?}"),
            Ok(_) => panic!("bind should have failed on a taken port"),
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let broker = Broker::bind(&loopback_config()).await.unwrap();
        let ctx = Context::new();
        let task = tokio::spawn(broker.run(ctx.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.shutdown();
        timeout(Duration::from_secs(1), task)
            .await
            .expect("broker should stop on shutdown")
            .unwrap()
            .unwrap();
    }
}
