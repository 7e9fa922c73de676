//! Message-bus socket roles over TCP.
//!
//! Six roles cover the broker's three endpoints and their client sides:
//!
//! - [`RouterSocket`] — frontend: many producers connect; inbound messages
//!   are stamped with a per-connection identity frame, outbound messages are
//!   routed back by that frame.
//! - [`DealerSocket`] — backend: many workers connect; outbound messages are
//!   dealt round-robin, replies are merged.
//! - [`PubSocket`] / [`SubSocket`] — monitor: filtered one-to-many fan-out
//!   with no delivery guarantee to slow subscribers.
//! - [`ReqSocket`] / [`RepSocket`] — producer and worker sides of the
//!   request/reply exchange, strict lockstep.
//!
//! All roles speak the multipart framing of [`crate::wire`]. Bound sockets
//! own background accept and peer tasks; dropping the socket aborts them.

mod dealer;
mod publisher;
mod replier;
mod requester;
mod router;
mod subscriber;

pub use dealer::DealerSocket;
pub use publisher::PubSocket;
pub use replier::RepSocket;
pub use requester::ReqSocket;
pub use router::RouterSocket;
pub use subscriber::SubSocket;

use thiserror::Error;

use crate::wire::WireError;

/// Errors produced by socket setup and use.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("wire protocol failure: {0}")]
    Wire(#[from] WireError),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("socket protocol violation: {0}")]
    Protocol(&'static str),
}

pub type Result<T> = std::result::Result<T, SocketError>;
