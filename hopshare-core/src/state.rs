//! Shared node state: routing table, liveness tracker, cached peer table versions, the
//! fragment store and the set of downloads in progress, each behind its own lock.
//!
//! Every method is one atomic step. Methods that need several structures lock them in the
//! fixed order liveness -> routing -> versions, or downloads -> fragments; the two groups are
//! never locked together. Nothing here performs I/O, so no lock outlives a call.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::error::{FragmentError, RoutingError};
use crate::fragment::{Fragment, FragmentStore, PutOutcome};
use crate::identity::{ContentId, PeerId, SessionId};
use crate::liveness::LivenessTracker;
use crate::protocol::UpdateKind;
use crate::routing::{
    RoutingTable, RoutingTableEntry, RoutingTableSnapshot, SearchHit, TableVersion,
};

/// Result of offering a peer's Hello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelloOutcome {
    /// Peer known and its table not newer than what we cached.
    AlreadyKnown,
    /// Merged; carries the insertion delta to re-propagate, if anything was new.
    Merged(Option<RoutingTableSnapshot>),
}

/// Result of a Pong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PongOutcome {
    UnknownPeer,
    /// Proof for an earlier probe round.
    Stale,
    /// Proof accepted; the peer's table is the one we cached.
    Alive,
    /// Proof accepted but the peer's table moved on without us hearing about it. Routes via
    /// the peer were purged; carries the withdrawal to broadcast, if any.
    Diverged(Option<RoutingTableSnapshot>),
}

/// A peer evicted by the strike wave and the withdrawal of every route through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub peer: PeerId,
    pub withdrawal: RoutingTableSnapshot,
}

pub struct NodeState {
    id: PeerId,
    liveness: Mutex<LivenessTracker>,
    routing: Mutex<RoutingTable>,
    versions: Mutex<HashMap<PeerId, TableVersion>>,
    fragments: Mutex<FragmentStore>,
    downloads: Mutex<HashSet<ContentId>>,
}

impl NodeState {
    pub fn new(id: PeerId, max_strikes: u32) -> Self {
        Self {
            liveness: Mutex::new(LivenessTracker::new(max_strikes)),
            routing: Mutex::new(RoutingTable::new(id.clone())),
            versions: Mutex::new(HashMap::new()),
            fragments: Mutex::new(FragmentStore::new()),
            downloads: Mutex::new(HashSet::new()),
            id,
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Seed a locally owned file: zero-hop route plus its fragments for serving.
    pub fn add_owned_content(&self, content: ContentId, name: &str, fragments: Vec<Fragment>) -> bool {
        let added = self
            .routing
            .lock()
            .add_owned_reference(content.clone(), name);
        self.fragments.lock().insert_file(content, fragments);
        added
    }

    pub fn table_version(&self) -> TableVersion {
        self.routing.lock().version()
    }

    pub fn snapshot(&self) -> RoutingTableSnapshot {
        self.routing.lock().snapshot()
    }

    pub fn is_known(&self, peer: &PeerId) -> bool {
        self.liveness.lock().contains(peer)
    }

    pub fn known_peers(&self) -> Vec<PeerId> {
        self.liveness.lock().peers()
    }

    pub fn cached_version(&self, peer: &PeerId) -> Option<TableVersion> {
        self.versions.lock().get(peer).copied()
    }

    /// Offer a Hello from `peer`. Accepted when the peer is unknown, nothing is cached for it,
    /// or its table is newer than the cached one.
    pub fn accept_hello(&self, peer: &PeerId, mut table: RoutingTableSnapshot) -> HelloOutcome {
        let mut liveness = self.liveness.lock();
        let mut routing = self.routing.lock();
        let mut versions = self.versions.lock();

        let known = liveness.contains(peer);
        let cached = versions.get(peer).copied();
        if known && cached.is_some_and(|v| table.version <= v) {
            return HelloOutcome::AlreadyKnown;
        }
        let peer_version = table.version;
        table.transform_to_perspective(peer, &self.id);
        let added = routing.merge(&table);
        liveness.mark_alive(peer.clone());
        versions.insert(peer.clone(), peer_version);

        HelloOutcome::Merged((!added.is_empty()).then(|| routing.snapshot_of(added)))
    }

    /// Apply a routing update from `peer`. Returns the delta to re-propagate if our table
    /// changed.
    pub fn apply_update(
        &self,
        peer: &PeerId,
        change: UpdateKind,
        mut table: RoutingTableSnapshot,
    ) -> Option<RoutingTableSnapshot> {
        let mut routing = self.routing.lock();
        let mut versions = self.versions.lock();

        let peer_version = table.version;
        table.transform_to_perspective(peer, &self.id);
        let changed = match change {
            UpdateKind::Inserted => routing.merge(&table),
            UpdateKind::Removed => routing.withdraw(&table, peer),
        };
        versions.insert(peer.clone(), peer_version);

        (!changed.is_empty()).then(|| routing.snapshot_of(changed))
    }

    /// Handle a liveness proof from `peer` for probe round `session`.
    pub fn record_pong(&self, session: &SessionId, peer: &PeerId, version: TableVersion) -> PongOutcome {
        let mut liveness = self.liveness.lock();
        if !liveness.contains(peer) {
            return PongOutcome::UnknownPeer;
        }
        if !liveness.mark_alive_if_current(session, peer.clone()) {
            return PongOutcome::Stale;
        }
        let mut routing = self.routing.lock();
        let mut versions = self.versions.lock();
        if versions.get(peer) == Some(&version) {
            return PongOutcome::Alive;
        }
        versions.remove(peer);
        let removed = routing.remove_all_references_via(peer);
        PongOutcome::Diverged((!removed.is_empty()).then(|| routing.snapshot_of(removed)))
    }

    /// Open a probe round. Returns the peers to ping.
    pub fn start_probe_round(&self, session: SessionId) -> Vec<PeerId> {
        let mut liveness = self.liveness.lock();
        liveness.start_probe_round(session);
        liveness.peers()
    }

    /// Close a probe round: strike every peer, and for each evicted one forget its cached
    /// version and purge the routes through it.
    pub fn evict_silent_peers(&self) -> Vec<Eviction> {
        let mut liveness = self.liveness.lock();
        let mut routing = self.routing.lock();
        let mut versions = self.versions.lock();

        liveness
            .apply_strike_wave()
            .into_iter()
            .map(|peer| {
                versions.remove(&peer);
                let removed = routing.remove_all_references_via(&peer);
                Eviction {
                    withdrawal: routing.snapshot_of(removed),
                    peer,
                }
            })
            .collect()
    }

    pub fn best_path(&self, content: &ContentId) -> Result<RoutingTableEntry, RoutingError> {
        self.routing.lock().best_path(content).cloned()
    }

    pub fn next_hop_for(&self, destination: &PeerId) -> Option<PeerId> {
        self.routing.lock().next_hop_for(destination).cloned()
    }

    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        self.routing.lock().search(query)
    }

    /// Printable routing table, for diagnostics.
    pub fn routing_summary(&self) -> String {
        self.routing.lock().to_string()
    }

    pub fn fragment_at(&self, content: &ContentId, offset: u64) -> Option<Fragment> {
        self.fragments.lock().fragment_at(content, offset)
    }

    /// Record that this node is fetching `content`.
    pub fn begin_download(&self, content: &ContentId) {
        self.downloads.lock().insert(content.clone());
    }

    pub fn is_downloading(&self, content: &ContentId) -> bool {
        self.downloads.lock().contains(content)
    }

    /// File a fragment of a download in progress. `None` when `content` is not being fetched
    /// here, which covers late copies arriving after completion.
    pub fn put_fragment(
        &self,
        content: &ContentId,
        fragment: Fragment,
    ) -> Result<Option<PutOutcome>, FragmentError> {
        let mut downloads = self.downloads.lock();
        if !downloads.contains(content) {
            return Ok(None);
        }
        let outcome = self.fragments.lock().put_fragment(content, fragment)?;
        if matches!(outcome, PutOutcome::Completed(_)) {
            downloads.remove(content);
        }
        Ok(Some(outcome))
    }

    /// Offset a download of `content` should ask for next: the end of what is held, or the
    /// first hole once the tail has been reached.
    pub fn next_wanted_offset(&self, content: &ContentId) -> u64 {
        let fragments = self.fragments.lock();
        let next = fragments.next_missing_offset(content);
        match fragments.total_size(content) {
            Some(total) if next >= total => fragments.first_gap_offset(content).unwrap_or(next),
            _ => next,
        }
    }
}
