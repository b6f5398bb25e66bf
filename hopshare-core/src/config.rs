//! Protocol parameters shared by the dispatcher and the keepalive scheduler.

use std::time::Duration;

use crate::fragment::DEFAULT_CHUNK_SIZE;
use crate::liveness::DEFAULT_MAX_STRIKES;

/// Default keepalive interval: how long peers have to answer a ping.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of keepalive cycles between full Hello broadcasts.
pub const DEFAULT_HELLO_EVERY: u64 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub probe_interval: Duration,
    /// Consecutive missed probe rounds before eviction.
    pub max_strikes: u32,
    /// Fragment payload size for local files.
    pub chunk_size: usize,
    /// Broadcast a full Hello every this many keepalive cycles (0 disables).
    pub hello_every: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            probe_interval: DEFAULT_PROBE_INTERVAL,
            max_strikes: DEFAULT_MAX_STRIKES,
            chunk_size: DEFAULT_CHUNK_SIZE,
            hello_every: DEFAULT_HELLO_EVERY,
        }
    }
}
