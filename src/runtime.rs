//! Runtime assembly for the master process.
//!
//! Opens the cache, binds the broker, and supervises the three long-running
//! tasks (broker, traffic monitor, lockstep driver) as one unit: the first
//! task to stop — cleanly or not — shuts the others down, and any failure
//! is reported to the caller so the process exits nonzero instead of limping
//! along partially alive.

use std::sync::Arc;

use futures::future::{join_all, select_all};
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerError};
use crate::cache::{Cache, CacheError};
use crate::config::Config;
use crate::context::Context;
use crate::driver::{DriverError, DriverLoop};
use crate::monitor::{LoggingHandler, MonitorError, TrafficHandler, TrafficMonitor};

/// Errors surfaced by the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("{0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// The master runtime: cache, broker, monitor, and driver under one
/// supervisor.
pub struct Runtime {
    config: Config,
    handler: Arc<dyn TrafficHandler>,
}

impl Runtime {
    /// Runtime with the default logging traffic handler.
    pub fn new(config: Config) -> Self {
        Self::with_handler(config, Arc::new(LoggingHandler))
    }

    /// Runtime with a custom traffic handler.
    pub fn with_handler(config: Config, handler: Arc<dyn TrafficHandler>) -> Self {
        Self { config, handler }
    }

    /// Run until interrupted or until any task fails.
    pub async fn run(self) -> Result<()> {
        let ctx = Context::new();
        let signal_ctx = ctx.clone();
        let signal_task = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, shutting down");
                    signal_ctx.shutdown();
                }
                Err(e) => warn!(error = %e, "Failed to listen for interrupt"),
            }
        });

        let result = self.run_with_context(ctx).await;
        signal_task.abort();
        result
    }

    /// Run until the given context is cancelled or until any task fails.
    ///
    /// The cache must open before anything binds: a master that cannot
    /// persist does not get to accept traffic.
    pub async fn run_with_context(self, ctx: Context) -> Result<()> {
        let _cache = Cache::open(&self.config.cache.path)?;

        let broker = Broker::bind(&self.config).await?;
        let monitor = TrafficMonitor::new(broker.monitor_addr().to_string(), self.handler.clone());
        let driver = DriverLoop::new(broker.frontend_addr().to_string());

        let broker_task = {
            let ctx = ctx.clone();
            tokio::spawn(async move { broker.run(ctx).await.map_err(RuntimeError::from) })
        };
        let monitor_task = {
            let ctx = ctx.clone();
            tokio::spawn(async move { monitor.run(ctx).await.map_err(RuntimeError::from) })
        };
        let driver_task = {
            let ctx = ctx.clone();
            tokio::spawn(async move { driver.run(ctx).await.map_err(RuntimeError::from) })
        };

        Self::supervise(
            vec![
                ("broker", broker_task),
                ("monitor", monitor_task),
                ("driver", driver_task),
            ],
            &ctx,
        )
        .await
    }

    /// Wait for the first task to stop, then stop and drain the rest.
    ///
    /// Returns the first task's outcome; failures in the remaining tasks
    /// are logged and only reported if the first task stopped cleanly.
    async fn supervise(
        tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
        ctx: &Context,
    ) -> Result<()> {
        let (mut names, handles): (Vec<&'static str>, Vec<_>) = tasks.into_iter().unzip();

        let (first, index, remaining) = select_all(handles).await;
        let name = names.remove(index);
        let mut outcome = Self::task_outcome(name, first);
        match &outcome {
            Ok(()) => info!(task = name, "Task finished, stopping the rest"),
            Err(e) => error!(task = name, error = %e, "Task failed, stopping the rest"),
        }
        ctx.shutdown();

        for (name, joined) in names.into_iter().zip(join_all(remaining).await) {
            match Self::task_outcome(name, joined) {
                Ok(()) => debug!(task = name, "Task stopped"),
                Err(e) => {
                    error!(task = name, error = %e, "Task failed during shutdown");
                    if outcome.is_ok() {
                        outcome = Err(e);
                    }
                }
            }
        }
        outcome
    }

    fn task_outcome(
        name: &'static str,
        joined: std::result::Result<Result<()>, JoinError>,
    ) -> Result<()> {
        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(RuntimeError::Task(format!("{name} task panicked"))),
            Err(_) => Err(RuntimeError::Task(format!("{name} task was aborted"))),
        }
    }
}
