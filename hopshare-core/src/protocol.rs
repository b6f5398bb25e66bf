//! hopshare wire protocol: the message record, its payload variants, and constructors.

use serde::{Deserialize, Serialize};

use crate::fragment::Fragment;
use crate::identity::{ContentId, PeerId, SessionId};
use crate::routing::{RoutingTableSnapshot, TableVersion};

/// Current protocol version. Carried in every frame header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Hop budget given to every new message.
pub const STANDARD_TTL: u8 = 62;

/// Outcome carried by a message; anything but `Valid` accompanies an `Error` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Valid,
    /// No known next hop towards the destination.
    Unroutable,
    /// The serving node does not hold the requested content or offset.
    NotFound,
    /// The request could not be understood (e.g. missing or bad params).
    Malformed,
}

/// What a content request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    /// The full routing table; answered with a Hello.
    RoutingTable,
    /// The routing table version; answered with a Pong.
    RoutingTableVersion,
    /// One fragment of a file: params are `[content id, offset]`.
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateKind {
    Inserted,
    Removed,
}

/// Body of a content response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Content {
    Fragment(Fragment),
    Empty,
}

/// Message kind as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Hello,
    Ping,
    Pong,
    RequestContent,
    ResponseContent,
    RoutingUpdateInsert,
    RoutingUpdateRemove,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Full routing table announcement.
    Hello { table: RoutingTableSnapshot },
    /// Liveness probe; the session is the probe round.
    Ping,
    /// Liveness proof carrying the sender's current table version.
    Pong { version: TableVersion },
    RequestContent {
        kind: ContentKind,
        params: Vec<String>,
    },
    ResponseContent {
        kind: ContentKind,
        params: Vec<String>,
        content: Content,
    },
    /// Delta of the sender's table; `table.version` is the sender's version after the change.
    RoutingUpdate {
        change: UpdateKind,
        table: RoutingTableSnapshot,
    },
    Error { reason: String },
}

/// One protocol data unit.
///
/// `node_path` records the hops of a routed request: the origin sends `[origin, next_hop]`,
/// each intermediate pushes its own next hop, and a reply travels back by popping.
/// Single-hop control messages carry `[source, BROADCAST]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub source: PeerId,
    pub destination: PeerId,
    pub error_code: ErrorCode,
    pub ttl: u8,
    pub session: SessionId,
    pub node_path: Vec<PeerId>,
    pub payload: Payload,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match &self.payload {
            Payload::Hello { .. } => MessageKind::Hello,
            Payload::Ping => MessageKind::Ping,
            Payload::Pong { .. } => MessageKind::Pong,
            Payload::RequestContent { .. } => MessageKind::RequestContent,
            Payload::ResponseContent { .. } => MessageKind::ResponseContent,
            Payload::RoutingUpdate {
                change: UpdateKind::Inserted,
                ..
            } => MessageKind::RoutingUpdateInsert,
            Payload::RoutingUpdate {
                change: UpdateKind::Removed,
                ..
            } => MessageKind::RoutingUpdateRemove,
            Payload::Error { .. } => MessageKind::Error,
        }
    }

    /// Single-hop message to `destination` (a peer or a broadcast sentinel).
    fn link_local(source: &PeerId, destination: PeerId, session: SessionId, payload: Payload) -> Self {
        Self {
            source: source.clone(),
            destination,
            error_code: ErrorCode::Valid,
            ttl: STANDARD_TTL,
            session,
            node_path: vec![source.clone(), PeerId::broadcast()],
            payload,
        }
    }

    pub fn hello(source: &PeerId, destination: PeerId, table: RoutingTableSnapshot) -> Self {
        Self::link_local(
            source,
            destination,
            SessionId::generate(),
            Payload::Hello { table },
        )
    }

    pub fn ping(source: &PeerId, destination: PeerId, session: SessionId) -> Self {
        Self::link_local(source, destination, session, Payload::Ping)
    }

    /// Pong answering a ping of round `session`.
    pub fn pong(source: &PeerId, destination: PeerId, session: SessionId, version: TableVersion) -> Self {
        Self::link_local(source, destination, session, Payload::Pong { version })
    }

    pub fn routing_update(source: &PeerId, change: UpdateKind, table: RoutingTableSnapshot) -> Self {
        Self::link_local(
            source,
            PeerId::broadcast(),
            SessionId::generate(),
            Payload::RoutingUpdate { change, table },
        )
    }

    /// Ask `peer` (a direct neighbour) for its full table.
    pub fn table_request(source: &PeerId, peer: PeerId) -> Self {
        Self {
            source: source.clone(),
            destination: peer.clone(),
            error_code: ErrorCode::Valid,
            ttl: STANDARD_TTL,
            session: SessionId::generate(),
            node_path: vec![source.clone(), peer],
            payload: Payload::RequestContent {
                kind: ContentKind::RoutingTable,
                params: Vec::new(),
            },
        }
    }

    /// Request the fragment of `content` at `offset` from `destination`, first hop `next_hop`.
    pub fn file_request(
        source: &PeerId,
        destination: PeerId,
        next_hop: PeerId,
        content: &ContentId,
        offset: u64,
    ) -> Self {
        Self {
            source: source.clone(),
            destination,
            error_code: ErrorCode::Valid,
            ttl: STANDARD_TTL,
            session: SessionId::generate(),
            node_path: vec![source.clone(), next_hop],
            payload: Payload::RequestContent {
                kind: ContentKind::File,
                params: vec![content.to_string(), offset.to_string()],
            },
        }
    }

    /// Reply to a routed request from its final hop: pops `source` off the path and addresses
    /// the reply to the request's origin (`node_path[0]`).
    pub fn reply_to(request: &Message, source: &PeerId, error_code: ErrorCode, payload: Payload) -> Self {
        let mut node_path = request.node_path.clone();
        node_path.pop();
        let destination = node_path
            .first()
            .cloned()
            .unwrap_or_else(|| request.source.clone());
        Self {
            source: source.clone(),
            destination,
            error_code,
            ttl: STANDARD_TTL,
            session: request.session.clone(),
            node_path,
            payload,
        }
    }

    pub fn error_reply(request: &Message, source: &PeerId, code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::reply_to(
            request,
            source,
            code,
            Payload::Error {
                reason: reason.into(),
            },
        )
    }

    /// The hop this message is currently travelling to, if it is routed.
    pub fn current_hop(&self) -> Option<&PeerId> {
        self.node_path.last()
    }
}
