//! Message dispatcher: takes one received message, updates shared state, returns actions.
//! The host decodes datagrams, feeds them in, and performs the returned actions.

use std::sync::Arc;

use tracing::{debug, info, warn, Span};

use crate::error::RequestError;
use crate::fragment::{AssembledFile, Fragment, PutOutcome};
use crate::identity::{ContentId, PeerId, SessionId};
use crate::protocol::{Content, ContentKind, ErrorCode, Message, MessageKind, Payload, UpdateKind};
use crate::routing::{RoutingTableSnapshot, TableVersion};
use crate::state::{HelloOutcome, NodeState, PongOutcome};
use crate::wire;

/// Action for the host to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    /// Put the message on the wire.
    SendMessage(Message),
    /// A download finished; the host persists it.
    DownloadComplete(AssembledFile),
    /// A request originated here was answered with an error, or could not be continued.
    RequestFailed {
        source: PeerId,
        code: ErrorCode,
        reason: String,
    },
}

pub struct Dispatcher {
    state: Arc<NodeState>,
    span: Span,
}

impl Dispatcher {
    pub fn new(state: Arc<NodeState>, span: Span) -> Self {
        Self { state, span }
    }

    pub fn state(&self) -> &Arc<NodeState> {
        &self.state
    }

    fn id(&self) -> &PeerId {
        self.state.id()
    }

    /// Full table announcement to `destination`.
    pub fn hello(&self, destination: PeerId) -> Message {
        Message::hello(self.id(), destination, self.state.snapshot())
    }

    /// Decode one datagram and dispatch it. Malformed datagrams are dropped.
    pub fn on_datagram(&self, bytes: &[u8]) -> Vec<OutboundAction> {
        match wire::decode_frame(bytes) {
            Ok((msg, _)) => self.on_message(msg),
            Err(e) => {
                let _guard = self.span.enter();
                debug!(error = %e, len = bytes.len(), "dropping malformed datagram");
                Vec::new()
            }
        }
    }

    pub fn on_message(&self, msg: Message) -> Vec<OutboundAction> {
        let _guard = self.span.enter();
        if &msg.source == self.id() {
            return Vec::new();
        }
        if msg.ttl == 0 {
            debug!(from = %msg.source, kind = ?msg.kind(), "ttl expired");
            return Vec::new();
        }
        debug!(from = %msg.source, to = %msg.destination, kind = ?msg.kind(), "received");

        let for_me = self.is_for_me(&msg);
        match msg.kind() {
            MessageKind::RequestContent if for_me => self.serve_request(&msg),
            MessageKind::RequestContent if self.is_my_hop(&msg) => self.forward_request(msg),
            MessageKind::ResponseContent | MessageKind::Error if for_me => self.on_reply(msg),
            MessageKind::ResponseContent | MessageKind::Error if self.is_my_hop(&msg) => {
                self.forward_reply(msg)
            }
            MessageKind::RequestContent | MessageKind::ResponseContent | MessageKind::Error => {
                Vec::new()
            }
            _ if for_me => self.on_link_local(msg),
            _ => Vec::new(),
        }
    }

    fn on_link_local(&self, msg: Message) -> Vec<OutboundAction> {
        match msg.payload {
            Payload::Hello { table } => self.on_hello(&msg.source, table),
            Payload::Ping => self.on_ping(&msg.source, msg.session),
            Payload::Pong { version } => self.on_pong(&msg.source, &msg.session, version),
            Payload::RoutingUpdate { change, table } => {
                self.on_routing_update(&msg.source, change, table)
            }
            _ => Vec::new(),
        }
    }

    /// Start, or resume, downloading `content` from its best known holder.
    pub fn request_content(&self, content: &ContentId) -> Result<Message, RequestError> {
        let _guard = self.span.enter();
        let request = self.request_from_offset(content, self.state.next_wanted_offset(content))?;
        self.state.begin_download(content);
        Ok(request)
    }

    fn request_from_offset(&self, content: &ContentId, offset: u64) -> Result<Message, RequestError> {
        let path = self.state.best_path(content)?;
        if path.is_local() {
            return Err(RequestError::AlreadyLocal(content.clone()));
        }
        info!(%content, %offset, via = %path.next_hop, from = %path.destination, "requesting");
        Ok(Message::file_request(
            self.id(),
            path.destination,
            path.next_hop,
            content,
            offset,
        ))
    }

    fn is_for_me(&self, msg: &Message) -> bool {
        &msg.destination == self.id() || msg.destination.is_broadcast()
    }

    fn is_my_hop(&self, msg: &Message) -> bool {
        msg.current_hop() == Some(self.id())
    }

    fn on_hello(&self, peer: &PeerId, table: RoutingTableSnapshot) -> Vec<OutboundAction> {
        match self.state.accept_hello(peer, table) {
            HelloOutcome::AlreadyKnown => {
                debug!(%peer, "hello carries nothing newer");
                Vec::new()
            }
            HelloOutcome::Merged(delta) => {
                info!(%peer, "peer table merged");
                delta
                    .map(|d| self.propagate(UpdateKind::Inserted, d))
                    .into_iter()
                    .collect()
            }
        }
    }

    fn on_ping(&self, peer: &PeerId, session: SessionId) -> Vec<OutboundAction> {
        let reply = if self.state.is_known(peer) {
            Message::pong(self.id(), peer.clone(), session, self.state.table_version())
        } else {
            debug!(%peer, "ping from unknown peer; introducing ourselves");
            self.hello(peer.clone())
        };
        vec![OutboundAction::SendMessage(reply)]
    }

    fn on_pong(&self, peer: &PeerId, session: &SessionId, version: TableVersion) -> Vec<OutboundAction> {
        match self.state.record_pong(session, peer, version) {
            PongOutcome::UnknownPeer => {
                debug!(%peer, "pong from unknown peer");
                Vec::new()
            }
            PongOutcome::Stale => {
                debug!(%peer, %session, "pong for an old probe round");
                Vec::new()
            }
            PongOutcome::Alive => Vec::new(),
            PongOutcome::Diverged(withdrawal) => {
                info!(%peer, %version, "peer table changed unseen; resyncing");
                let mut out: Vec<OutboundAction> = withdrawal
                    .map(|w| self.propagate(UpdateKind::Removed, w))
                    .into_iter()
                    .collect();
                out.push(OutboundAction::SendMessage(Message::table_request(
                    self.id(),
                    peer.clone(),
                )));
                out
            }
        }
    }

    fn on_routing_update(
        &self,
        peer: &PeerId,
        change: UpdateKind,
        table: RoutingTableSnapshot,
    ) -> Vec<OutboundAction> {
        match self.state.apply_update(peer, change, table) {
            Some(delta) => {
                debug!(%peer, ?change, entries = delta.entry_count(), "table changed");
                vec![self.propagate(change, delta)]
            }
            None => Vec::new(),
        }
    }

    fn propagate(&self, change: UpdateKind, delta: RoutingTableSnapshot) -> OutboundAction {
        OutboundAction::SendMessage(Message::routing_update(self.id(), change, delta))
    }

    fn serve_request(&self, msg: &Message) -> Vec<OutboundAction> {
        let Payload::RequestContent { kind, params } = &msg.payload else {
            return Vec::new();
        };
        let reply = match kind {
            ContentKind::RoutingTable => self.hello(msg.source.clone()),
            ContentKind::RoutingTableVersion => Message::pong(
                self.id(),
                msg.source.clone(),
                msg.session.clone(),
                self.state.table_version(),
            ),
            ContentKind::File => match self.serve_fragment(msg, params) {
                Some(reply) => reply,
                None => return Vec::new(),
            },
        };
        vec![OutboundAction::SendMessage(reply)]
    }

    /// Fragment reply for a file request. `None` when a broadcast request misses here.
    fn serve_fragment(&self, msg: &Message, params: &[String]) -> Option<Message> {
        let Some((content, offset)) = parse_file_params(params) else {
            warn!(from = %msg.source, ?params, "malformed file request");
            return Some(Message::error_reply(
                msg,
                self.id(),
                ErrorCode::Malformed,
                "expected [content id, offset]",
            ));
        };
        match self.state.fragment_at(&content, offset) {
            Some(fragment) => {
                debug!(%content, offset, to = %msg.source, "serving fragment");
                Some(Message::reply_to(
                    msg,
                    self.id(),
                    ErrorCode::Valid,
                    Payload::ResponseContent {
                        kind: ContentKind::File,
                        params: params.to_vec(),
                        content: Content::Fragment(fragment),
                    },
                ))
            }
            None if msg.destination.is_broadcast() => None,
            None => {
                info!(%content, offset, to = %msg.source, "requested content not held");
                Some(Message::error_reply(
                    msg,
                    self.id(),
                    ErrorCode::NotFound,
                    format!("{content} not held at offset {offset}"),
                ))
            }
        }
    }

    fn forward_request(&self, mut msg: Message) -> Vec<OutboundAction> {
        match self.state.next_hop_for(&msg.destination) {
            Some(next) => {
                debug!(to = %msg.destination, via = %next, "forwarding request");
                msg.node_path.push(next);
                msg.ttl -= 1;
                vec![OutboundAction::SendMessage(msg)]
            }
            None => {
                info!(to = %msg.destination, from = %msg.source, "no route; bouncing request");
                let reason = format!("no route to {}", msg.destination);
                vec![OutboundAction::SendMessage(Message::error_reply(
                    &msg,
                    self.id(),
                    ErrorCode::Unroutable,
                    reason,
                ))]
            }
        }
    }

    fn forward_reply(&self, mut msg: Message) -> Vec<OutboundAction> {
        msg.node_path.pop();
        msg.ttl -= 1;
        debug!(to = %msg.destination, via = ?msg.current_hop(), "relaying reply");
        vec![OutboundAction::SendMessage(msg)]
    }

    fn on_reply(&self, msg: Message) -> Vec<OutboundAction> {
        match msg.payload {
            Payload::Error { reason } => {
                warn!(from = %msg.source, code = ?msg.error_code, %reason, "request failed");
                vec![OutboundAction::RequestFailed {
                    source: msg.source,
                    code: msg.error_code,
                    reason,
                }]
            }
            Payload::ResponseContent {
                kind: ContentKind::File,
                params,
                content: Content::Fragment(fragment),
            } => {
                let Some(content) = params.first().map(ContentId::new) else {
                    warn!(from = %msg.source, "fragment response without content id");
                    return Vec::new();
                };
                self.on_fragment(content, fragment)
            }
            _ => {
                debug!(from = %msg.source, "ignoring unexpected response");
                Vec::new()
            }
        }
    }

    fn on_fragment(&self, content: ContentId, fragment: Fragment) -> Vec<OutboundAction> {
        let offset = fragment.offset;
        match self.state.put_fragment(&content, fragment) {
            Ok(None) => {
                debug!(%content, offset, "fragment for no download in progress");
                Vec::new()
            }
            Ok(Some(PutOutcome::Completed(file))) => {
                info!(%content, name = %file.name, size = file.bytes.len(), "download complete");
                vec![OutboundAction::DownloadComplete(file)]
            }
            Ok(Some(PutOutcome::Duplicate)) => {
                debug!(%content, offset, "duplicate fragment");
                Vec::new()
            }
            Ok(Some(PutOutcome::Incomplete)) => {
                let next = self.state.next_wanted_offset(&content);
                vec![self.continue_download(&content, next)]
            }
            Err(e) => {
                warn!(%content, offset, error = %e, "rejected fragment");
                Vec::new()
            }
        }
    }

    /// Ask for the next fragment along the current best path.
    fn continue_download(&self, content: &ContentId, offset: u64) -> OutboundAction {
        match self.request_from_offset(content, offset) {
            Ok(msg) => OutboundAction::SendMessage(msg),
            Err(e) => {
                warn!(%content, offset, error = %e, "download stalled");
                OutboundAction::RequestFailed {
                    source: self.id().clone(),
                    code: ErrorCode::Unroutable,
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// `[content id, offset]`; a missing offset means 0.
fn parse_file_params(params: &[String]) -> Option<(ContentId, u64)> {
    let content = params.first().filter(|s| !s.is_empty())?;
    let offset = match params.get(1) {
        Some(raw) => raw.parse().ok()?,
        None => 0,
    };
    Some((ContentId::new(content.as_str()), offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::split;

    fn peer(s: &str) -> PeerId {
        PeerId::new(s)
    }

    fn node(id: &str) -> Dispatcher {
        let state = Arc::new(NodeState::new(peer(id), 3));
        Dispatcher::new(state, tracing::info_span!("node", id))
    }

    fn sent(actions: Vec<OutboundAction>) -> Vec<Message> {
        actions
            .into_iter()
            .filter_map(|a| match a {
                OutboundAction::SendMessage(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    type Link<'a> = Vec<(&'a str, &'a Dispatcher)>;

    /// Run a broadcast medium until quiet. `reach` gives the nodes that hear a sender; returns
    /// the non-send actions per node.
    fn settle<'a>(
        reach: impl Fn(&str) -> Link<'a>,
        first: Vec<(&'a str, Message)>,
    ) -> Vec<(&'a str, OutboundAction)> {
        let mut queue = first;
        let mut surfaced = Vec::new();
        let mut steps = 0;
        while let Some((sender, msg)) = queue.pop() {
            steps += 1;
            assert!(steps < 10_000, "network did not settle");
            for (name, node) in reach(sender) {
                for action in node.on_message(msg.clone()) {
                    match action {
                        OutboundAction::SendMessage(m) => queue.push((name, m)),
                        other => surfaced.push((name, other)),
                    }
                }
            }
        }
        surfaced
    }

    fn seed(d: &Dispatcher, name: &str, data: &[u8], chunk: usize) -> ContentId {
        let id = ContentId::of_bytes(data);
        d.state().add_owned_content(id.clone(), name, split(data, name, chunk));
        id
    }

    #[test]
    fn ping_from_unknown_peer_gets_hello() {
        let a = node("a");
        let out = sent(a.on_message(Message::ping(&peer("b"), PeerId::broadcast(), SessionId::new("s"))));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].destination, peer("b"));
        assert!(matches!(out[0].payload, Payload::Hello { .. }));
    }

    #[test]
    fn ping_from_known_peer_gets_pong_with_version() {
        let a = node("a");
        let b = node("b");
        a.on_message(b.hello(PeerId::multicast()));
        let out = sent(a.on_message(Message::ping(&peer("b"), peer("a"), SessionId::new("s"))));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].session, SessionId::new("s"));
        assert_eq!(
            out[0].payload,
            Payload::Pong {
                version: a.state().table_version()
            }
        );
    }

    #[test]
    fn own_and_expired_messages_are_dropped() {
        let a = node("a");
        assert!(a
            .on_message(Message::ping(&peer("a"), PeerId::broadcast(), SessionId::none()))
            .is_empty());
        let mut ping = Message::ping(&peer("b"), PeerId::broadcast(), SessionId::none());
        ping.ttl = 0;
        assert!(a.on_message(ping).is_empty());
        assert!(a.on_datagram(&[1, 2, 3]).is_empty());
    }

    #[test]
    fn messages_for_others_are_ignored() {
        let a = node("a");
        let ping = Message::ping(&peer("b"), peer("c"), SessionId::none());
        assert!(a.on_message(ping).is_empty());
    }

    #[test]
    fn two_node_download() {
        let a = node("a");
        let c = node("c");
        let data: Vec<u8> = (0..7000u32).map(|i| (i % 13) as u8).collect();
        let id = seed(&a, "notes.txt", &data, 3000);
        let reach = |_: &str| vec![("a", &a), ("c", &c)];

        settle(
            reach,
            vec![("a", a.hello(PeerId::multicast())), ("c", c.hello(PeerId::multicast()))],
        );

        let path = c.state().best_path(&id).unwrap();
        assert_eq!(path.hop_count, 1);
        assert_eq!(path.next_hop, peer("a"));

        let request = c.request_content(&id).unwrap();
        assert_eq!(request.node_path, vec![peer("c"), peer("a")]);
        let surfaced = settle(reach, vec![("c", request)]);
        assert_eq!(surfaced.len(), 1);
        match &surfaced[0] {
            (name, OutboundAction::DownloadComplete(file)) => {
                assert_eq!(*name, "c");
                assert_eq!(file.name, "notes.txt");
                assert_eq!(file.bytes, data);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn request_for_local_or_unknown_content_is_refused() {
        let a = node("a");
        let id = seed(&a, "x", b"x", 10);
        assert_eq!(a.request_content(&id), Err(RequestError::AlreadyLocal(id)));
        assert!(matches!(
            a.request_content(&ContentId::new("nope")),
            Err(RequestError::Routing(_))
        ));
    }

    /// Line a - b - c, delivered hop by hop so c never hears a directly.
    #[test]
    fn three_node_line_relays_through_middle() {
        let a = node("a");
        let b = node("b");
        let c = node("c");
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 7) as u8).collect();
        let id = seed(&a, "photo.jpg", &data, 3000);

        let reach = |sender: &str| match sender {
            "b" => vec![("a", &a), ("c", &c)],
            _ => vec![("b", &b)],
        };

        settle(
            reach,
            vec![
                ("a", a.hello(PeerId::multicast())),
                ("b", b.hello(PeerId::multicast())),
                ("c", c.hello(PeerId::multicast())),
            ],
        );

        let path = c.state().best_path(&id).unwrap();
        assert_eq!(path.hop_count, 2);
        assert_eq!(path.next_hop, peer("b"));
        assert_eq!(path.destination, peer("a"));

        let surfaced = settle(reach, vec![("c", c.request_content(&id).unwrap())]);
        let files: Vec<_> = surfaced
            .iter()
            .filter_map(|(n, a)| match a {
                OutboundAction::DownloadComplete(f) => Some((*n, f)),
                _ => None,
            })
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "c");
        assert_eq!(files[0].1.bytes, data);
    }

    #[test]
    fn unroutable_request_bounces_to_origin() {
        let b = node("b");
        let req = Message::file_request(&peer("c"), peer("z"), peer("b"), &ContentId::new("h"), 0);
        let out = sent(b.on_message(req));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].destination, peer("c"));
        assert_eq!(out[0].error_code, ErrorCode::Unroutable);
        assert_eq!(out[0].node_path, vec![peer("c")]);

        let c = node("c");
        let failed = c.on_message(out[0].clone());
        assert!(matches!(
            failed.as_slice(),
            [OutboundAction::RequestFailed {
                code: ErrorCode::Unroutable,
                ..
            }]
        ));
    }

    #[test]
    fn missing_content_and_bad_params() {
        let a = node("a");
        let req = Message::file_request(&peer("c"), peer("a"), peer("a"), &ContentId::new("h"), 0);
        let out = sent(a.on_message(req));
        assert_eq!(out[0].error_code, ErrorCode::NotFound);
        assert_eq!(out[0].destination, peer("c"));

        let mut bad = Message::file_request(&peer("c"), peer("a"), peer("a"), &ContentId::new("h"), 0);
        bad.payload = Payload::RequestContent {
            kind: ContentKind::File,
            params: vec!["h".into(), "not-a-number".into()],
        };
        let out = sent(a.on_message(bad));
        assert_eq!(out[0].error_code, ErrorCode::Malformed);
    }

    #[test]
    fn table_request_is_answered_with_hello() {
        let a = node("a");
        seed(&a, "x", b"x", 10);
        let out = sent(a.on_message(Message::table_request(&peer("b"), peer("a"))));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].destination, peer("b"));
        match &out[0].payload {
            Payload::Hello { table } => assert_eq!(table.entry_count(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn diverged_pong_triggers_table_request() {
        let a = node("a");
        let b = node("b");
        seed(&b, "x", b"x", 10);
        a.on_message(b.hello(PeerId::multicast()));

        let session = SessionId::new("r1");
        a.state().start_probe_round(session.clone());
        let newer = TableVersion::next_after(b.state().table_version());
        let out = sent(a.on_message(Message::pong(&peer("b"), peer("a"), session, newer)));
        assert_eq!(out.len(), 2);
        assert!(matches!(
            out[0].payload,
            Payload::RoutingUpdate {
                change: UpdateKind::Removed,
                ..
            }
        ));
        assert!(matches!(
            out[1].payload,
            Payload::RequestContent {
                kind: ContentKind::RoutingTable,
                ..
            }
        ));
        assert_eq!(out[1].destination, peer("b"));
    }

    #[test]
    fn hello_from_known_peer_with_newer_table_is_merged() {
        let a = node("a");
        let b = node("b");
        seed(&b, "x", b"x", 10);
        a.on_message(b.hello(PeerId::multicast()));
        assert!(a.on_message(b.hello(PeerId::multicast())).is_empty());

        let y = seed(&b, "y.txt", b"yy", 10);
        let out = sent(a.on_message(b.hello(PeerId::multicast())));
        assert_eq!(out.len(), 1);
        match &out[0].payload {
            Payload::RoutingUpdate {
                change: UpdateKind::Inserted,
                table,
            } => assert_eq!(table.entry_count(), 1),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(a.state().best_path(&y).unwrap().next_hop, peer("b"));
        assert_eq!(
            a.state().cached_version(&peer("b")),
            Some(b.state().table_version())
        );
    }

    #[test]
    fn pong_for_an_old_round_is_dropped() {
        let a = node("a");
        let b = node("b");
        let x = seed(&b, "x", b"x", 10);
        a.on_message(b.hello(PeerId::multicast()));

        a.state().start_probe_round(SessionId::new("r1"));
        a.state().start_probe_round(SessionId::new("r2"));
        let newer = TableVersion::next_after(b.state().table_version());
        let late = Message::pong(&peer("b"), peer("a"), SessionId::new("r1"), newer);
        assert!(a.on_message(late).is_empty());
        assert!(a.state().best_path(&x).is_ok());
        assert_eq!(
            a.state().cached_version(&peer("b")),
            Some(b.state().table_version())
        );
    }

    #[test]
    fn removal_update_is_propagated_onward() {
        let a = node("a");
        let b = node("b");
        let c = node("c");
        let x = seed(&a, "x", b"x", 10);
        b.on_message(a.hello(PeerId::multicast()));
        c.on_message(b.hello(PeerId::multicast()));
        assert_eq!(c.state().best_path(&x).unwrap().hop_count, 2);

        // b loses its route through a and tells its neighbours
        let session = SessionId::new("r1");
        b.state().start_probe_round(session.clone());
        let newer = TableVersion::next_after(a.state().table_version());
        let withdrawal = sent(b.on_message(Message::pong(&peer("a"), peer("b"), session, newer)))
            .remove(0);

        let out = sent(c.on_message(withdrawal));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source, peer("c"));
        match &out[0].payload {
            Payload::RoutingUpdate {
                change: UpdateKind::Removed,
                table,
            } => assert_eq!(table.entry_count(), 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(c.state().best_path(&x).is_err());
    }

    /// Pull `id` from `holder` to `fetcher` one fragment at a time; returns every reply seen.
    fn pull(
        fetcher: &Dispatcher,
        holder: &Dispatcher,
        id: &ContentId,
    ) -> (Vec<Message>, AssembledFile) {
        let mut replies = Vec::new();
        let mut request = fetcher.request_content(id).unwrap();
        loop {
            let reply = sent(holder.on_message(request)).remove(0);
            replies.push(reply.clone());
            match fetcher.on_message(reply).remove(0) {
                OutboundAction::SendMessage(next) => request = next,
                OutboundAction::DownloadComplete(file) => return (replies, file),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn late_fragment_after_completion_is_ignored() {
        let a = node("a");
        let c = node("c");
        let data: Vec<u8> = (0..7000u32).map(|i| (i % 11) as u8).collect();
        let id = seed(&a, "late.bin", &data, 3000);
        c.on_message(a.hello(PeerId::multicast()));

        let (replies, file) = pull(&c, &a, &id);
        assert_eq!(replies.len(), 3);
        assert_eq!(file.bytes, data);
        assert!(!c.state().is_downloading(&id));

        for copy in replies {
            assert!(c.on_message(copy).is_empty());
        }
        // asking again starts a fresh transfer
        let (_, again) = pull(&c, &a, &id);
        assert_eq!(again.bytes, data);
    }

    #[test]
    fn fragment_with_overflowing_offset_is_dropped() {
        let a = node("a");
        let c = node("c");
        let data = vec![5u8; 10];
        let id = seed(&a, "tiny", &data, 4);
        c.on_message(a.hello(PeerId::multicast()));

        let request = c.request_content(&id).unwrap();
        let reply = sent(a.on_message(request)).remove(0);
        let mut hostile = reply.clone();
        if let Payload::ResponseContent {
            content: Content::Fragment(fragment),
            ..
        } = &mut hostile.payload
        {
            fragment.offset = u64::MAX;
            fragment.bytes = vec![1];
        }
        assert!(c.on_message(hostile).is_empty());

        let next = sent(c.on_message(reply));
        assert_eq!(next.len(), 1);
        assert_eq!(
            next[0].payload,
            Payload::RequestContent {
                kind: ContentKind::File,
                params: vec![id.to_string(), "4".into()],
            }
        );
    }

    #[test]
    fn request_inside_a_fragment_is_served_from_that_offset() {
        let a = node("a");
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 17) as u8).collect();
        let id = seed(&a, "f", &data, 2000);
        let req = Message::file_request(&peer("c"), peer("a"), peer("a"), &id, 3000);
        let out = sent(a.on_message(req));
        match &out[0].payload {
            Payload::ResponseContent {
                content: Content::Fragment(fragment),
                ..
            } => {
                assert_eq!(fragment.offset, 3000);
                assert_eq!(fragment.bytes, data[3000..4000]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
