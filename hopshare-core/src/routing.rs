//! Distance-vector content routing table.
//!
//! Each node keeps, per content ID, the set of paths it knows to the owner of that content.
//! Tables are gossiped whole (Hello) or as deltas (RoutingUpdate); a receiver first rewrites
//! what it got into its own perspective (`RoutingTableSnapshot::transform_to_perspective`)
//! and then merges or withdraws it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::RoutingError;
use crate::identity::{ContentId, PeerId};

/// Paths grouped by content key.
pub type ContentPaths = BTreeMap<ContentId, BTreeSet<RoutingTableEntry>>;

/// Opaque, monotonically increasing table version.
///
/// Advances to `max(previous + 1, unix millis)`, so it never goes backwards even when the
/// wall clock does. Peers only compare versions of the same owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TableVersion(u64);

impl TableVersion {
    pub const INITIAL: TableVersion = TableVersion(0);

    pub fn next_after(previous: TableVersion) -> TableVersion {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        TableVersion(previous.0.saturating_add(1).max(now))
    }

    pub fn from_raw(raw: u64) -> TableVersion {
        TableVersion(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TableVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// One known path to one content item.
///
/// Identity (equality, hashing, ordering) is name, destination, next hop and hop count;
/// `participants` is bookkeeping for split horizon and does not distinguish paths.
/// Ordering puts the fewest hops first, so the first element of a set is its best path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingTableEntry {
    pub name: String,
    pub destination: PeerId,
    pub next_hop: PeerId,
    pub hop_count: u32,
    pub participants: BTreeSet<PeerId>,
}

impl RoutingTableEntry {
    /// Zero-hop entry for content stored by `owner`.
    pub fn owned(name: impl Into<String>, owner: PeerId) -> Self {
        Self {
            name: name.into(),
            destination: owner.clone(),
            next_hop: PeerId::no_hop(),
            hop_count: 0,
            participants: BTreeSet::from([owner]),
        }
    }

    pub fn is_local(&self) -> bool {
        self.next_hop.is_no_hop()
    }

    fn key(&self) -> (u32, &PeerId, &PeerId, &str) {
        (
            self.hop_count,
            &self.destination,
            &self.next_hop,
            self.name.as_str(),
        )
    }
}

impl PartialEq for RoutingTableEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for RoutingTableEntry {}

impl Hash for RoutingTableEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for RoutingTableEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RoutingTableEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for RoutingTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} via {} ({} hops)",
            self.name, self.destination, self.next_hop, self.hop_count
        )
    }
}

/// Wire form of a routing table, or of the subset of it that changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTableSnapshot {
    pub owner: PeerId,
    pub version: TableVersion,
    pub previous_version: TableVersion,
    pub paths: ContentPaths,
}

impl RoutingTableSnapshot {
    pub fn empty(owner: PeerId) -> Self {
        Self {
            owner,
            version: TableVersion::INITIAL,
            previous_version: TableVersion::INITIAL,
            paths: ContentPaths::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn entry_count(&self) -> usize {
        self.paths.values().map(BTreeSet::len).sum()
    }

    /// Rewrite a table received from `peer` into `self_id`'s view, one hop further away.
    ///
    /// Split horizon first: entries whose destination is `self_id`, or whose path already went
    /// through `self_id`, are dropped. Every remaining entry gets `next_hop = peer`, one more
    /// hop, and `self_id` added to its participants.
    pub fn transform_to_perspective(&mut self, peer: &PeerId, self_id: &PeerId) {
        let paths = std::mem::take(&mut self.paths);
        for (content, entries) in paths {
            let rewritten: BTreeSet<RoutingTableEntry> = entries
                .into_iter()
                .filter(|e| e.destination != *self_id && !e.participants.contains(self_id))
                .map(|mut e| {
                    e.next_hop = peer.clone();
                    e.hop_count = e.hop_count.saturating_add(1);
                    e.participants.insert(self_id.clone());
                    e
                })
                .collect();
            if !rewritten.is_empty() {
                self.paths.insert(content, rewritten);
            }
        }
    }
}

/// One search result: a content key, its matching paths (best first) and the number of
/// query words found in its names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub content: ContentId,
    pub paths: Vec<RoutingTableEntry>,
    pub score: usize,
}

/// The routing table of one node.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    owner: PeerId,
    version: TableVersion,
    previous_version: TableVersion,
    paths: ContentPaths,
}

impl RoutingTable {
    pub fn new(owner: PeerId) -> Self {
        Self {
            owner,
            version: TableVersion::next_after(TableVersion::INITIAL),
            previous_version: TableVersion::INITIAL,
            paths: ContentPaths::new(),
        }
    }

    pub fn owner(&self) -> &PeerId {
        &self.owner
    }

    pub fn version(&self) -> TableVersion {
        self.version
    }

    pub fn previous_version(&self) -> TableVersion {
        self.previous_version
    }

    pub fn len(&self) -> usize {
        self.paths.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn entries(&self, content: &ContentId) -> Option<&BTreeSet<RoutingTableEntry>> {
        self.paths.get(content)
    }

    fn advance_version(&mut self) {
        self.previous_version = self.version;
        self.version = TableVersion::next_after(self.version);
    }

    /// Record content stored by this node. Returns false if it was already known as local.
    pub fn add_owned_reference(&mut self, content: ContentId, name: impl Into<String>) -> bool {
        let entry = RoutingTableEntry::owned(name, self.owner.clone());
        let inserted = self.paths.entry(content).or_default().insert(entry);
        if inserted {
            self.advance_version();
        }
        inserted
    }

    /// Union a table (already in this node's perspective) into ours.
    ///
    /// Returns the entries that were not known before; the version advances only if that is
    /// non-empty. Tables owned by this node, and entries pointing at it, are ignored.
    pub fn merge(&mut self, table: &RoutingTableSnapshot) -> ContentPaths {
        let mut added = ContentPaths::new();
        if table.owner == self.owner {
            return added;
        }
        for (content, entries) in &table.paths {
            for entry in entries {
                if entry.destination == self.owner
                    || entry.next_hop == self.owner
                    || entry.next_hop.is_sentinel()
                {
                    continue;
                }
                let local = self.paths.entry(content.clone()).or_default();
                if local.insert(entry.clone()) {
                    added
                        .entry(content.clone())
                        .or_default()
                        .insert(entry.clone());
                }
            }
        }
        // or_default above may have left empty sets behind for fully filtered keys
        self.paths.retain(|_, set| !set.is_empty());
        if !added.is_empty() {
            self.advance_version();
        }
        added
    }

    /// Remove the paths of `table` (already in this node's perspective) learned via `peer`.
    ///
    /// Returns what was actually removed; the version advances only if that is non-empty.
    pub fn withdraw(&mut self, table: &RoutingTableSnapshot, peer: &PeerId) -> ContentPaths {
        let mut removed = ContentPaths::new();
        if table.owner == self.owner {
            return removed;
        }
        for (content, entries) in &table.paths {
            let Some(local) = self.paths.get_mut(content) else {
                continue;
            };
            for entry in entries.iter().filter(|e| e.next_hop == *peer) {
                if let Some(gone) = local.take(entry) {
                    removed.entry(content.clone()).or_default().insert(gone);
                }
            }
            if local.is_empty() {
                self.paths.remove(content);
            }
        }
        if !removed.is_empty() {
            self.advance_version();
        }
        removed
    }

    /// Purge every path whose next hop is `peer`, returning them grouped by content.
    pub fn remove_all_references_via(&mut self, peer: &PeerId) -> ContentPaths {
        let mut removed = ContentPaths::new();
        for (content, local) in self.paths.iter_mut() {
            let gone: BTreeSet<RoutingTableEntry> =
                local.iter().filter(|e| e.next_hop == *peer).cloned().collect();
            if gone.is_empty() {
                continue;
            }
            local.retain(|e| e.next_hop != *peer);
            removed.insert(content.clone(), gone);
        }
        self.paths.retain(|_, set| !set.is_empty());
        if !removed.is_empty() {
            self.advance_version();
        }
        removed
    }

    /// Path with the fewest hops to `content`.
    pub fn best_path(&self, content: &ContentId) -> Result<&RoutingTableEntry, RoutingError> {
        self.paths
            .get(content)
            .and_then(|set| set.first())
            .ok_or_else(|| RoutingError::NotFound(content.clone()))
    }

    /// Neighbour to forward through to reach `destination`, if any path leads there.
    pub fn next_hop_for(&self, destination: &PeerId) -> Option<&PeerId> {
        self.paths
            .values()
            .flatten()
            .filter(|e| e.destination == *destination && !e.is_local())
            .min_by_key(|e| e.hop_count)
            .map(|e| &e.next_hop)
    }

    /// Case-insensitive keyword search over content names, most matching words first.
    /// An empty query lists every content item with score 0.
    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        let words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        let mut hits: Vec<SearchHit> = self
            .paths
            .iter()
            .filter_map(|(content, set)| {
                let mut score = 0;
                let paths: Vec<RoutingTableEntry> = set
                    .iter()
                    .filter(|e| {
                        let name = e.name.to_lowercase();
                        let matched = words.iter().filter(|w| name.contains(w.as_str())).count();
                        score = score.max(matched);
                        words.is_empty() || matched > 0
                    })
                    .cloned()
                    .collect();
                (!paths.is_empty()).then(|| SearchHit {
                    content: content.clone(),
                    paths,
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.content.cmp(&b.content)));
        hits
    }

    /// The whole table as sent in a Hello.
    pub fn snapshot(&self) -> RoutingTableSnapshot {
        self.snapshot_of(self.paths.clone())
    }

    /// A delta stamped with this table's owner and current versions.
    pub fn snapshot_of(&self, paths: ContentPaths) -> RoutingTableSnapshot {
        RoutingTableSnapshot {
            owner: self.owner.clone(),
            version: self.version,
            previous_version: self.previous_version,
            paths,
        }
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "owner {} ({})", self.owner, self.version)?;
        for (content, set) in &self.paths {
            for entry in set {
                writeln!(f, "  {} -> {}", content, entry)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(s: &str) -> PeerId {
        PeerId::new(s)
    }

    fn content(s: &str) -> ContentId {
        ContentId::new(s)
    }

    /// Table of `owner` as it would arrive at `receiver`, already transformed.
    fn received(owner: &RoutingTable, receiver: &PeerId) -> RoutingTableSnapshot {
        let mut snap = owner.snapshot();
        snap.transform_to_perspective(owner.owner(), receiver);
        snap
    }

    #[test]
    fn owned_reference_is_zero_hop_local() {
        let mut t = RoutingTable::new(peer("a"));
        let v0 = t.version();
        assert!(t.add_owned_reference(content("h"), "f.txt"));
        let best = t.best_path(&content("h")).unwrap();
        assert_eq!(best.hop_count, 0);
        assert!(best.is_local());
        assert_eq!(best.destination, peer("a"));
        assert!(best.participants.contains(&peer("a")));
        assert!(t.version() > v0);
        assert_eq!(t.previous_version(), v0);

        let v1 = t.version();
        assert!(!t.add_owned_reference(content("h"), "f.txt"));
        assert_eq!(t.version(), v1);
    }

    #[test]
    fn merge_credits_peer_and_adds_a_hop() {
        let mut a = RoutingTable::new(peer("a"));
        a.add_owned_reference(content("h"), "song.mp3");
        let mut b = RoutingTable::new(peer("b"));

        let added = b.merge(&received(&a, b.owner()));
        assert_eq!(added.len(), 1);
        let best = b.best_path(&content("h")).unwrap();
        assert_eq!(best.next_hop, peer("a"));
        assert_eq!(best.destination, peer("a"));
        assert_eq!(best.hop_count, 1);
        assert!(best.participants.contains(&peer("b")));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut a = RoutingTable::new(peer("a"));
        a.add_owned_reference(content("h1"), "one");
        a.add_owned_reference(content("h2"), "two");
        let mut b = RoutingTable::new(peer("b"));
        let snap = received(&a, b.owner());

        assert!(!b.merge(&snap).is_empty());
        let after_first = b.snapshot().paths;
        let version = b.version();

        assert!(b.merge(&snap).is_empty());
        assert_eq!(b.snapshot().paths, after_first);
        assert_eq!(b.version(), version);
    }

    #[test]
    fn merge_ignores_own_table() {
        let mut a = RoutingTable::new(peer("a"));
        let mut other = RoutingTable::new(peer("x"));
        other.add_owned_reference(content("h"), "f");
        let mut snap = other.snapshot();
        snap.owner = peer("a");
        let version = a.version();
        assert!(a.merge(&snap).is_empty());
        assert!(a.is_empty());
        assert_eq!(a.version(), version);
    }

    #[test]
    fn split_horizon_drops_paths_through_self() {
        // a owns h; b learns it from a; a then hears b's table back.
        let mut a = RoutingTable::new(peer("a"));
        a.add_owned_reference(content("h"), "f");
        let mut b = RoutingTable::new(peer("b"));
        b.merge(&received(&a, b.owner()));
        b.add_owned_reference(content("g"), "g-file");

        let mut back = b.snapshot();
        back.transform_to_perspective(b.owner(), a.owner());
        // only b's own content survives the transform
        assert_eq!(back.entry_count(), 1);
        assert!(back.paths.contains_key(&content("g")));

        a.merge(&back);
        for entry in a.snapshot().paths.values().flatten() {
            if !entry.is_local() {
                assert_ne!(entry.destination, peer("a"));
                assert_ne!(entry.next_hop, peer("a"));
            }
        }
        assert_eq!(a.entries(&content("h")).unwrap().len(), 1);
    }

    #[test]
    fn split_horizon_drops_paths_already_traversed() {
        // a -> b -> c chain; c's table comes back to a through b.
        let mut a = RoutingTable::new(peer("a"));
        a.add_owned_reference(content("h"), "f");
        let mut b = RoutingTable::new(peer("b"));
        b.merge(&received(&a, b.owner()));
        let mut c = RoutingTable::new(peer("c"));
        c.merge(&received(&b, c.owner()));
        assert_eq!(c.best_path(&content("h")).unwrap().hop_count, 2);

        let mut at_b = c.snapshot();
        at_b.transform_to_perspective(c.owner(), b.owner());
        assert!(at_b.is_empty());
    }

    #[test]
    fn hop_count_grows_by_one_per_link() {
        let mut a = RoutingTable::new(peer("a"));
        a.add_owned_reference(content("h"), "f");
        let mut prev = a;
        for name in ["b", "c", "d", "e"] {
            let mut next = RoutingTable::new(peer(name));
            let reported = prev.best_path(&content("h")).unwrap().hop_count;
            next.merge(&received(&prev, next.owner()));
            let learned = next.best_path(&content("h")).unwrap();
            assert_eq!(learned.hop_count, reported + 1);
            assert_eq!(&learned.next_hop, prev.owner());
            prev = next;
        }
    }

    #[test]
    fn best_path_prefers_fewest_hops() {
        let mut t = RoutingTable::new(peer("me"));
        let mut far = RoutingTableSnapshot::empty(peer("x"));
        let mut entry = RoutingTableEntry::owned("f", peer("owner"));
        entry.next_hop = peer("x");
        entry.hop_count = 4;
        far.paths.entry(content("h")).or_default().insert(entry.clone());
        entry.next_hop = peer("y");
        entry.hop_count = 2;
        far.paths.entry(content("h")).or_default().insert(entry);
        t.merge(&far);

        let best = t.best_path(&content("h")).unwrap();
        assert_eq!(best.hop_count, 2);
        assert_eq!(best.next_hop, peer("y"));
        assert_eq!(t.next_hop_for(&peer("owner")), Some(&peer("y")));
        assert_eq!(t.next_hop_for(&peer("nobody")), None);
        assert_eq!(
            t.best_path(&content("missing")),
            Err(RoutingError::NotFound(content("missing")))
        );
    }

    #[test]
    fn withdraw_removes_matching_paths_only() {
        let mut a = RoutingTable::new(peer("a"));
        a.add_owned_reference(content("h1"), "one");
        a.add_owned_reference(content("h2"), "two");
        let mut b = RoutingTable::new(peer("b"));
        b.merge(&received(&a, b.owner()));

        let mut removal = a.snapshot_of(
            a.snapshot()
                .paths
                .into_iter()
                .filter(|(c, _)| *c == content("h1"))
                .collect(),
        );
        removal.transform_to_perspective(&peer("a"), &peer("b"));
        let version = b.version();
        let removed = b.withdraw(&removal, &peer("a"));
        assert_eq!(removed.len(), 1);
        assert!(b.entries(&content("h1")).is_none());
        assert!(b.entries(&content("h2")).is_some());
        assert!(b.version() > version);

        // again: nothing left to remove, version stays
        let version = b.version();
        assert!(b.withdraw(&removal, &peer("a")).is_empty());
        assert_eq!(b.version(), version);
    }

    #[test]
    fn withdraw_from_other_peer_is_ignored() {
        let mut a = RoutingTable::new(peer("a"));
        a.add_owned_reference(content("h"), "f");
        let mut b = RoutingTable::new(peer("b"));
        let snap = received(&a, b.owner());
        b.merge(&snap);
        assert!(b.withdraw(&snap, &peer("z")).is_empty());
        assert!(b.withdraw(&RoutingTableSnapshot { owner: peer("b"), ..snap }, &peer("a")).is_empty());
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn remove_all_references_via_peer() {
        let mut t = RoutingTable::new(peer("me"));
        t.add_owned_reference(content("mine"), "mine");
        let mut x = RoutingTable::new(peer("x"));
        x.add_owned_reference(content("h1"), "one");
        x.add_owned_reference(content("h2"), "two");
        t.merge(&received(&x, t.owner()));
        let mut y = RoutingTable::new(peer("y"));
        y.add_owned_reference(content("h1"), "one");
        t.merge(&received(&y, t.owner()));
        assert_eq!(t.len(), 4);

        let version = t.version();
        let removed = t.remove_all_references_via(&peer("x"));
        assert_eq!(removed.values().map(BTreeSet::len).sum::<usize>(), 2);
        assert!(t.version() > version);
        assert_eq!(t.len(), 2);
        assert!(t.entries(&content("h2")).is_none());
        assert_eq!(t.best_path(&content("h1")).unwrap().next_hop, peer("y"));

        let version = t.version();
        assert!(t.remove_all_references_via(&peer("x")).is_empty());
        assert_eq!(t.version(), version);
    }

    #[test]
    fn search_ranks_by_matching_words() {
        let mut t = RoutingTable::new(peer("me"));
        t.add_owned_reference(content("h1"), "Holiday Photos 2019.zip");
        t.add_owned_reference(content("h2"), "holiday video.mp4");
        t.add_owned_reference(content("h3"), "notes.txt");

        let hits = t.search("HOLIDAY photos");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, content("h1"));
        assert_eq!(hits[0].score, 2);
        assert_eq!(hits[1].content, content("h2"));
        assert_eq!(hits[1].score, 1);

        assert!(t.search("missing").is_empty());
        assert_eq!(t.search("").len(), 3);
        assert_eq!(t.search("   ").len(), 3);
    }

    #[test]
    fn versions_only_move_forward() {
        let mut v = TableVersion::INITIAL;
        for _ in 0..100 {
            let next = TableVersion::next_after(v);
            assert!(next > v);
            v = next;
        }
        let far = TableVersion::from_raw(u64::MAX - 1);
        assert!(TableVersion::next_after(far) > far);
    }
}
