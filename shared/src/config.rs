use crate::{
    DEFAULT_EMA_ALPHA, FRAGMENT_SIZE, FRAGMENT_TTL_SECS, HANDSHAKE_POLL_MS, HANDSHAKE_TIMEOUT_SECS,
    MISSING_OBJECT_ATTEMPTS, MISSING_OBJECT_RETRY_SECS, PING_INTERVAL_MS, SPRITE_SYNC_INTERVAL_MS,
    TRANSFORM_SYNC_INTERVAL_MS,
};
use std::time::Duration;

/// Numeric tunables of the replication layer
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Encoded payloads above this many bytes are fragmented
    pub fragment_size: usize,
    /// Incomplete fragment sets older than this are evicted
    pub fragment_ttl: Duration,
    /// Minimum gap between two ping requests
    pub ping_interval: Duration,
    /// Weight of the newest sample in the latency average
    pub ema_alpha: f64,
    pub ping_timeout: Duration,
    pub scene_sync_timeout: Duration,
    /// Cadence at which the handshake re-checks its progress
    pub handshake_poll: Duration,
    pub missing_object_retry: Duration,
    pub missing_object_attempts: u32,
    pub transform_sync_interval: Duration,
    pub sprite_sync_interval: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            fragment_size: FRAGMENT_SIZE,
            fragment_ttl: Duration::from_secs(FRAGMENT_TTL_SECS),
            ping_interval: Duration::from_millis(PING_INTERVAL_MS),
            ema_alpha: DEFAULT_EMA_ALPHA,
            ping_timeout: Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
            scene_sync_timeout: Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
            handshake_poll: Duration::from_millis(HANDSHAKE_POLL_MS),
            missing_object_retry: Duration::from_secs(MISSING_OBJECT_RETRY_SECS),
            missing_object_attempts: MISSING_OBJECT_ATTEMPTS,
            transform_sync_interval: Duration::from_millis(TRANSFORM_SYNC_INTERVAL_MS),
            sprite_sync_interval: Duration::from_millis(SPRITE_SYNC_INTERVAL_MS),
        }
    }
}

impl NetworkConfig {
    pub fn with_fragment_size(mut self, fragment_size: usize) -> Self {
        self.fragment_size = fragment_size.max(1);
        self
    }

    /// Applies the same timeout to both handshake phases
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self.scene_sync_timeout = timeout;
        self
    }
}
