//! hopshare protocol core: distance-vector content routing over a link-local medium.
//! Host-driven: no I/O; the host feeds received messages and timer ticks and performs the
//! returned actions.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fragment;
pub mod identity;
pub mod keepalive;
pub mod liveness;
pub mod protocol;
pub mod routing;
pub mod state;
pub mod wire;

pub use config::ProtocolConfig;
pub use dispatcher::{Dispatcher, OutboundAction};
pub use error::{FragmentError, RequestError, RoutingError};
pub use fragment::{split, AssembledFile, Fragment, FragmentStore, PutOutcome};
pub use identity::{ContentId, PeerId, SessionId};
pub use keepalive::Keepalive;
pub use liveness::LivenessTracker;
pub use protocol::{ErrorCode, Message, MessageKind, Payload, PROTOCOL_VERSION};
pub use routing::{RoutingTable, RoutingTableEntry, RoutingTableSnapshot, SearchHit, TableVersion};
pub use state::NodeState;
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
