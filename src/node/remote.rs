// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Liveness tracking for a single remote node.

use crate::{
    krpc::Kind,
    node::{Addr, AddrId},
};
use std::time::{Duration, Instant};

/// A node is considered `Good` if it responded within this window, or
/// queried us within this window while also having responded at least once.
pub const GOOD_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// A node becomes `Bad` once it has missed more than this many responses.
pub const MAX_MISSING_RESPONSES: u32 = 2;

/// Liveness classification used by bucket admission and replacement.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RemoteState {
    Good,
    Questionable,
    Bad,
}

/// A remote node tracked by the routing table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteNode<A: Addr = std::net::SocketAddr> {
    pub addr_id: AddrId<A>,
    pub last_response: Option<Instant>,
    pub last_query: Option<Instant>,
    pub last_pinged: Option<Instant>,
    pub missing_responses: u32,
}

impl<A: Addr> RemoteNode<A> {
    #[must_use]
    pub fn with_addr_id(addr_id: AddrId<A>) -> Self {
        RemoteNode {
            addr_id,
            last_response: None,
            last_query: None,
            last_pinged: None,
            missing_responses: 0,
        }
    }

    /// Updates liveness counters for an inbound message of the given kind.
    pub fn on_msg_received(&mut self, kind: &Kind<'_>, now: Instant) {
        match kind {
            Kind::Response => self.received_response(now),
            Kind::Error => self.received_error(now),
            Kind::Query => self.received_query(now),
            Kind::Unknown(_) => {}
        }
    }

    fn received_response(&mut self, now: Instant) {
        self.last_response = Some(now);
        self.last_pinged = None;
        self.missing_responses = self.missing_responses.saturating_sub(1);
    }

    fn received_error(&mut self, now: Instant) {
        self.last_response = Some(now);
        self.missing_responses = self.missing_responses.saturating_add(1);
    }

    fn received_query(&mut self, now: Instant) {
        self.last_query = Some(now);
    }

    /// A query we sent timed out without a response.
    pub fn on_resp_timeout(&mut self) {
        self.missing_responses = self.missing_responses.saturating_add(1);
    }

    /// Records that we sent a liveness probe, so the replacement logic does
    /// not probe the same node twice concurrently.
    pub fn on_ping(&mut self, now: Instant) {
        self.last_pinged = Some(now);
    }

    /// Classifies the node's liveness state as of `now`.
    #[must_use]
    pub fn state_with_now(&self, now: Instant) -> RemoteState {
        if self.missing_responses > MAX_MISSING_RESPONSES {
            return RemoteState::Bad;
        }
        if let Some(last_response) = self.last_response {
            if now.saturating_duration_since(last_response) < GOOD_INTERVAL {
                return RemoteState::Good;
            }
        }
        if let Some(last_query) = self.last_query {
            if self.last_response.is_some() && now.saturating_duration_since(last_query) < GOOD_INTERVAL
            {
                return RemoteState::Good;
            }
        }
        RemoteState::Questionable
    }

    /// The most recent of `last_query`/`last_response`, used to order
    /// questionable nodes from least to most recently seen. `None` sorts
    /// first (never interacted with).
    #[must_use]
    pub fn last_interaction(&self) -> Option<Instant> {
        match (self.last_query, self.last_response) {
            (None, None) => None,
            (Some(q), None) => Some(q),
            (None, Some(r)) => Some(r),
            (Some(q), Some(r)) => Some(q.max(r)),
        }
    }

    /// Deadline after which this node is due for a re-probe; used purely to
    /// order nodes within a bucket (nodes never pinged sort before those
    /// pinged more recently).
    #[must_use]
    pub fn next_msg_deadline(&self) -> Option<Instant> {
        self.last_pinged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Id;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn node() -> RemoteNode<SocketAddrV4> {
        let addr = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881);
        RemoteNode::with_addr_id(AddrId::with_addr_and_id(addr, Some(Id::rand().unwrap())))
    }

    #[test]
    fn unseen_node_is_questionable() {
        let n = node();
        assert_eq!(n.state_with_now(Instant::now()), RemoteState::Questionable);
    }

    #[test]
    fn response_makes_node_good_and_clears_missing() {
        let mut n = node();
        n.missing_responses = 2;
        n.received_response(Instant::now());
        assert_eq!(n.missing_responses, 1);
        assert_eq!(n.state_with_now(Instant::now()), RemoteState::Good);
    }

    #[test]
    fn three_missing_responses_makes_node_bad() {
        let mut n = node();
        n.on_resp_timeout();
        n.on_resp_timeout();
        n.on_resp_timeout();
        assert_eq!(n.missing_responses, 3);
        assert_eq!(n.state_with_now(Instant::now()), RemoteState::Bad);
    }

    #[test]
    fn error_counts_as_a_response_for_recency_but_increments_miss_counter() {
        let mut n = node();
        n.received_error(Instant::now());
        assert_eq!(n.missing_responses, 1);
        assert_eq!(n.state_with_now(Instant::now()), RemoteState::Good);
    }

    #[test]
    fn query_alone_without_prior_response_is_not_good() {
        let mut n = node();
        n.received_query(Instant::now());
        assert_eq!(n.state_with_now(Instant::now()), RemoteState::Questionable);
    }
}
