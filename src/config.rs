//! Relay configuration.

use crate::events::RetryPolicy;
use std::time::Duration;

/// Tunables for the relay and every session it opens.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// How far back a reconnect replays when the client's `since` is unusable.
    /// Default: 15 minutes
    pub replay_window: Duration,

    /// Interval between heartbeat frames on an idle stream.
    /// Default: 30s
    pub heartbeat_interval: Duration,

    /// Pause between consecutive `missed_event` frames.
    /// Default: 50ms
    pub replay_frame_delay: Duration,

    /// Frames buffered per connection before further frames are dropped.
    /// Default: 256
    pub connection_buffer: usize,

    /// Max cache entries before least-recently-used eviction.
    /// Default: 1024
    pub cache_capacity: usize,

    /// TTL applied by `Cache::get`.
    /// Default: 5 minutes
    pub cache_ttl: Duration,

    /// How often the background sweeper drops expired cache entries.
    /// Default: 60s
    pub cache_sweep_interval: Duration,

    /// Retry policy for durable store reads and writes.
    pub retry: RetryPolicy,

    /// Pending webhook notifications before the endpoint starts shedding.
    /// Default: 1024
    pub webhook_queue: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            replay_window: Duration::from_secs(15 * 60),
            heartbeat_interval: Duration::from_secs(30),
            replay_frame_delay: Duration::from_millis(50),
            connection_buffer: 256,
            cache_capacity: 1024,
            cache_ttl: Duration::from_secs(5 * 60),
            cache_sweep_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            webhook_queue: 1024,
        }
    }
}
