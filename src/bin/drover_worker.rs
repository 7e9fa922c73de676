//! drover-worker: Echo worker for the dispatch backend
//!
//! Connects to the master's backend endpoint and answers one request at a
//! time: payloads that parse as dispatch requests get `{"ack": <request>}`
//! back, anything else is echoed unchanged. Useful for exercising a master
//! end to end.
//!
//! ## Configuration
//! - DROVER_CONFIG: Path to the YAML config file (default: config.yaml)
//! - DROVER_HOST / DROVER_BACKEND_PORT: Where the backend endpoint lives
//! - DROVER_LOG: Log filter (overrides the configured log_level)

use std::time::Duration;

use backon::Retryable;
use bytes::Bytes;
use tracing::{debug, info, warn};

use drover::config::Config;
use drover::driver::Request;
use drover::socket::{RepSocket, SocketError};
use drover::utils::bootstrap::init_tracing;
use drover::utils::retry::connection_backoff;
use drover::wire::Multipart;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    init_tracing(&config.log_level);

    let backend = config.backend_addr();
    let mut socket = (|| {
        let addr = backend.clone();
        async move { RepSocket::connect(&addr).await }
    })
    .retry(connection_backoff())
    .notify(|err: &SocketError, dur: Duration| {
        warn!(error = %err, delay = ?dur, "Backend not ready, retrying");
    })
    .await?;

    info!(addr = %backend, "drover-worker connected");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, exiting");
                return Ok(());
            }
            received = socket.recv() => {
                let message = received?;
                socket.send(answer(&message)).await?;
            }
        }
    }
}

/// Acknowledge dispatch requests, echo everything else.
fn answer(message: &Multipart) -> Multipart {
    let payload = match message.first() {
        Some(frame) => frame,
        None => return Multipart::single(Bytes::new()),
    };
    match Request::from_bytes(payload) {
        Ok(request) => {
            debug!(request = request.request, "Acknowledging request");
            let ack = serde_json::json!({ "ack": request.request });
            Multipart::single(Bytes::from(serde_json::to_vec(&ack).unwrap_or_default()))
        }
        Err(_) => {
            debug!(bytes = payload.len(), "Echoing opaque payload");
            message.clone()
        }
    }
}
