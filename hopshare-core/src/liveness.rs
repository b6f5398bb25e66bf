//! Liveness tracking: per-peer strike counters scoped to a probe round.
//!
//! Usage per round: `start_probe_round(token)`, ping peers, let replies call
//! `mark_alive_if_current`, then `apply_strike_wave` once the reply window closes.

use std::collections::HashMap;

use crate::identity::{PeerId, SessionId};

/// Default number of consecutive missed rounds before a peer is evicted.
pub const DEFAULT_MAX_STRIKES: u32 = 3;

/// Strike value of a peer that proved itself alive in the current round. The next wave
/// brings it to 0 rather than counting a miss.
const ALIVE: i32 = -1;

/// Peers absent from the map are unknown, not dead.
#[derive(Debug)]
pub struct LivenessTracker {
    current_session: SessionId,
    max_strikes: u32,
    strikes: HashMap<PeerId, i32>,
}

impl LivenessTracker {
    /// `max_strikes` below 1 is clamped to 1.
    pub fn new(max_strikes: u32) -> Self {
        Self {
            current_session: SessionId::none(),
            max_strikes: max_strikes.max(1),
            strikes: HashMap::new(),
        }
    }

    pub fn max_strikes(&self) -> u32 {
        self.max_strikes
    }

    pub fn current_session(&self) -> &SessionId {
        &self.current_session
    }

    /// Open a new round; proofs referencing any other token stop counting.
    pub fn start_probe_round(&mut self, session: SessionId) {
        self.current_session = session;
    }

    /// Reset `peer` to alive regardless of round. Starts tracking unknown peers.
    pub fn mark_alive(&mut self, peer: PeerId) {
        self.strikes.insert(peer, ALIVE);
    }

    /// `mark_alive` only if `session` is the current round. Returns whether it applied.
    pub fn mark_alive_if_current(&mut self, session: &SessionId, peer: PeerId) -> bool {
        if *session != self.current_session {
            return false;
        }
        self.mark_alive(peer);
        true
    }

    /// Add one strike to every tracked peer; evict and return those reaching the threshold.
    pub fn apply_strike_wave(&mut self) -> Vec<PeerId> {
        let max = self.max_strikes as i32;
        let mut evicted = Vec::new();
        for (peer, strikes) in self.strikes.iter_mut() {
            *strikes += 1;
            if *strikes >= max {
                evicted.push(peer.clone());
            }
        }
        for peer in &evicted {
            self.strikes.remove(peer);
        }
        evicted.sort();
        evicted
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.strikes.contains_key(peer)
    }

    pub fn remove(&mut self, peer: &PeerId) -> bool {
        self.strikes.remove(peer).is_some()
    }

    /// Missed rounds so far; `None` if unknown. A peer alive this round reports 0.
    pub fn strikes(&self, peer: &PeerId) -> Option<u32> {
        self.strikes.get(peer).map(|&s| s.max(0) as u32)
    }

    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.strikes.keys().cloned().collect();
        peers.sort();
        peers
    }

    pub fn len(&self) -> usize {
        self.strikes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strikes.is_empty()
    }
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STRIKES)
    }
}
