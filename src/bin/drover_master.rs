//! drover-master: Monitored queue broker with a lockstep driver
//!
//! The master node of the dispatch engine. Binds the frontend, backend, and
//! monitor endpoints, opens the durable cache, and runs the broker, traffic
//! monitor, and lockstep driver under one supervisor. Any task failure
//! shuts the process down.
//!
//! ## Architecture
//! ```text
//! [driver] ---> [frontend] --+--> [backend] ---> [workers]
//!                            |
//!                         mirror
//!                            |
//!                            v
//!                       [monitor] ---> [subscribers]
//! ```
//!
//! ## Configuration
//! - DROVER_CONFIG: Path to the YAML config file (default: config.yaml)
//! - DROVER_HOST: Bind host (default: 127.0.0.1)
//! - DROVER_FRONTEND_PORT / DROVER_BACKEND_PORT / DROVER_MONITORING_PORT:
//!   Endpoint ports (defaults: 5559 / 5560 / 5561)
//! - DROVER_CACHE_PATH: Cache directory (default: ./data/master_cache)
//! - DROVER_LOG: Log filter (overrides the configured log_level)

use tracing::info;

use drover::config::Config;
use drover::runtime::Runtime;
use drover::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    init_tracing(&config.log_level);

    info!(
        frontend = %config.frontend_addr(),
        backend = %config.backend_addr(),
        monitoring = %config.monitoring_addr(),
        cache = %config.cache.path,
        "drover-master starting"
    );

    Runtime::new(config).run().await?;
    Ok(())
}
