//! Shared communication context.
//!
//! One [`Context`] is created by the harness and a clone is handed to every
//! task. It carries the process-wide stop signal: task loops race their
//! blocking receives against [`Context::cancelled`] so shutdown is observed
//! promptly, and anything holding a clone may trigger shutdown. There is no
//! ambient global; whoever needs the context gets it passed in.

use std::sync::Arc;

use tokio::sync::watch;

/// Cheaply cloneable handle shared by all tasks of one harness.
#[derive(Clone)]
pub struct Context {
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Context {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Signal every task holding a clone of this context to stop.
    ///
    /// Idempotent; later calls are no-ops.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Resolve once shutdown is signalled.
    ///
    /// Cancel-safe: may be raced in `select!` against blocking receives any
    /// number of times.
    pub async fn cancelled(&self) {
        let mut rx = self.shutdown_rx.clone();
        // An Err here means every sender is gone, which only happens at
        // teardown; treat it as cancellation rather than hanging.
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
