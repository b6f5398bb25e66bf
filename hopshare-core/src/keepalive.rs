//! Keepalive rounds: ping every known peer, then after the probe interval strike the silent
//! ones and withdraw routes through evicted peers. The host owns the timer and calls
//! `begin_round`, sleeps `probe_interval`, then calls `end_round`.

use std::sync::Arc;

use tracing::{debug, info, Span};

use crate::config::ProtocolConfig;
use crate::dispatcher::OutboundAction;
use crate::identity::{PeerId, SessionId};
use crate::protocol::{Message, UpdateKind};
use crate::state::NodeState;

pub struct Keepalive {
    state: Arc<NodeState>,
    hello_every: u64,
    cycle: u64,
    span: Span,
}

impl Keepalive {
    pub fn new(state: Arc<NodeState>, config: &ProtocolConfig, span: Span) -> Self {
        Self {
            state,
            hello_every: config.hello_every,
            cycle: 0,
            span,
        }
    }

    /// Rounds begun so far.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Open a probe round: fresh session, one ping per known peer (one broadcast ping if none
    /// are known), plus a full Hello every `hello_every` cycles.
    pub fn begin_round(&mut self) -> Vec<OutboundAction> {
        let _guard = self.span.enter();
        self.cycle += 1;
        let me = self.state.id().clone();
        let session = SessionId::generate();
        let peers = self.state.start_probe_round(session.clone());
        debug!(cycle = self.cycle, peers = peers.len(), %session, "probe round");

        let mut out: Vec<OutboundAction> = if peers.is_empty() {
            vec![OutboundAction::SendMessage(Message::ping(&me, PeerId::broadcast(), session))]
        } else {
            peers
                .into_iter()
                .map(|peer| OutboundAction::SendMessage(Message::ping(&me, peer, session.clone())))
                .collect()
        };
        if self.hello_every > 0 && self.cycle % self.hello_every == 0 {
            out.push(OutboundAction::SendMessage(Message::hello(
                &me,
                PeerId::broadcast(),
                self.state.snapshot(),
            )));
        }
        out
    }

    /// Close the round: evict peers over the strike limit and broadcast one withdrawal per
    /// evicted peer, even when it carries no routes.
    pub fn end_round(&mut self) -> Vec<OutboundAction> {
        let _guard = self.span.enter();
        let me = self.state.id().clone();
        self.state
            .evict_silent_peers()
            .into_iter()
            .map(|eviction| {
                info!(
                    peer = %eviction.peer,
                    routes = eviction.withdrawal.entry_count(),
                    "peer evicted"
                );
                OutboundAction::SendMessage(Message::routing_update(
                    &me,
                    UpdateKind::Removed,
                    eviction.withdrawal,
                ))
            })
            .collect()
    }
}
