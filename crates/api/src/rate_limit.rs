//! Rate Limiting for telemetry ingestion
//!
//! Per-device-IP limits using tower_governor (GCRA). Devices that flood the
//! ingestion endpoint get 429s instead of starving other subjects.

use governor::middleware::StateInformationMiddleware;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::PeerIpKeyExtractor;

/// Governor config with X-RateLimit-* headers enabled
pub type IngestGovernorConfig =
    tower_governor::governor::GovernorConfig<PeerIpKeyExtractor, StateInformationMiddleware>;

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Seconds to replenish one request
    pub per_second: u64,
    /// Requests a device may send back to back
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // Devices report every few seconds and flush a backlog on reconnect
        Self {
            per_second: 1,
            burst_size: 30,
        }
    }
}

impl RateLimitConfig {
    pub fn strict() -> Self {
        Self {
            per_second: 2,
            burst_size: 10,
        }
    }

    pub fn lenient() -> Self {
        Self {
            per_second: 1,
            burst_size: 120,
        }
    }
}

/// Build the governor config, `None` when either value is zero.
///
/// Keys on the peer IP, so the server must be run with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_governor_config(config: &RateLimitConfig) -> Option<Arc<IngestGovernorConfig>> {
    GovernorConfigBuilder::default()
        .per_second(config.per_second)
        .burst_size(config.burst_size)
        .use_headers()
        .finish()
        .map(Arc::new)
}
