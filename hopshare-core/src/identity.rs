//! Identifiers: peer IDs (with addressing sentinels), content IDs, probe/request sessions.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const BROADCAST: &str = "ff:ff:ff:ff:ff:ff";
const MULTICAST: &str = "multicast";
const NO_HOP: &str = "-";

/// Peer identifier. Opaque on the wire; three values are reserved as sentinels.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }

    /// Random identifier for a node that was not given one.
    pub fn generate() -> Self {
        PeerId(uuid::Uuid::new_v4().simple().to_string())
    }

    /// "All link-local peers".
    pub fn broadcast() -> Self {
        PeerId(BROADCAST.to_string())
    }

    /// Also "all link-local peers"; used for the startup announcement.
    pub fn multicast() -> Self {
        PeerId(MULTICAST.to_string())
    }

    /// Next hop of content stored locally.
    pub fn no_hop() -> Self {
        PeerId(NO_HOP.to_string())
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST || self.0 == MULTICAST
    }

    pub fn is_no_hop(&self) -> bool {
        self.0 == NO_HOP
    }

    /// True for any of the reserved values. Such IDs can never be adopted by a node.
    pub fn is_sentinel(&self) -> bool {
        self.is_broadcast() || self.is_no_hop()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content identifier: lowercase hex SHA-256 of the file bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        ContentId(id.into())
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        ContentId(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token naming one probe round or one request/response exchange. Compared by equality only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }

    pub fn generate() -> Self {
        SessionId(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Placeholder before the first probe round; never produced by `generate`.
    pub fn none() -> Self {
        SessionId("n/a".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
