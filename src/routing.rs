// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Kademlia-style routing table (spec §4.1-§4.5): a binary tree of
//! buckets keyed by distance from the local id, with liveness-aware
//! admission, splitting limited to the bucket containing the pivot, and
//! a replacement queue drained by proactive pinging.

use crate::{
    error::Error,
    krpc::{ping::PingQueryArgs, Kind},
    msg_buffer,
    node::{
        remote::{RemoteNode, RemoteState},
        Addr, AddrId, Id,
    },
    ops::find_node::FindNodeOp,
    transaction, Config,
};
use std::cmp::Ordering;
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};
use tracing::debug;

/// How often a bucket with no observed changes triggers a refreshing
/// `find_node` toward a random id in its range (spec §4.5).
const EXPECT_CHANGE_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Clone, Debug, Eq, PartialEq)]
struct Bucket<A: Addr> {
    range: RangeInclusive<Id>,
    nodes: Vec<RemoteNode<A>>,
    replacement_nodes: Vec<RemoteNode<A>>,
    expected_change_deadline: Instant,
}

impl<A: Addr + Into<SocketAddr>> Bucket<A> {
    fn new(range: RangeInclusive<Id>, max_nodes_per_bucket: usize) -> Self {
        Bucket {
            range,
            nodes: Vec::with_capacity(max_nodes_per_bucket),
            replacement_nodes: Vec::with_capacity(max_nodes_per_bucket),
            expected_change_deadline: Instant::now() + Duration::from_secs(5 * 60),
        }
    }

    #[inline]
    fn update_expected_change_deadline(&mut self) {
        self.expected_change_deadline = Instant::now() + EXPECT_CHANGE_INTERVAL;
    }

    fn try_insert(&mut self, max_nodes_per_bucket: usize, addr_id: AddrId<A>, now: Instant) {
        if self.nodes.len() < max_nodes_per_bucket {
            self.nodes.push(RemoteNode::with_addr_id(addr_id));
            self.sort_node_ids(now);
            self.update_expected_change_deadline();
        } else if let Some(pos) = self
            .nodes
            .iter()
            .rev()
            .position(|n| n.state_with_now(now) == RemoteState::Bad)
        {
            self.nodes[pos] = RemoteNode::with_addr_id(addr_id);
            self.sort_node_ids(now);
            self.update_expected_change_deadline();
        } else {
            self.sort_node_ids(now);
            if let Some(pos) = self
                .nodes
                .iter()
                .rev()
                .position(|n| n.state_with_now(now) == RemoteState::Questionable)
            {
                self.nodes[pos] = RemoteNode::with_addr_id(addr_id);
                self.update_expected_change_deadline();
            }
        }
    }

    #[inline]
    fn max_replacement_nodes(&self, now: Instant) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.state_with_now(now) == RemoteState::Questionable)
            .count()
    }

    fn ping_least_recently_seen_questionable_node(
        &mut self,
        pivot: Id,
        config: &Config,
        tx_manager: &mut transaction::Manager,
        msg_buffer: &mut msg_buffer::Buffer,
        now: Instant,
    ) -> Result<(), Error> {
        let pinged_nodes_count = self
            .nodes
            .iter()
            .filter(|n| {
                n.state_with_now(now) == RemoteState::Questionable && n.last_pinged.is_some()
            })
            .count();
        if pinged_nodes_count >= self.replacement_nodes.len() {
            return Ok(());
        }
        let Some(node_to_ping) = self.nodes.iter_mut().rev().find(|n| {
            n.state_with_now(now) == RemoteState::Questionable && n.last_pinged.is_none()
        }) else {
            return Ok(());
        };
        msg_buffer.write_query(
            &PingQueryArgs::with_id(pivot),
            node_to_ping.addr_id,
            config.default_query_timeout,
            config.client_version.as_deref(),
            config.is_read_only_node,
            tx_manager,
        )?;
        node_to_ping.on_ping(now);
        Ok(())
    }

    fn on_msg_received(
        &mut self,
        max_nodes_per_bucket: usize,
        addr_id: AddrId<A>,
        kind: Kind<'_>,
        pivot: Id,
        config: &Config,
        tx_manager: &mut transaction::Manager,
        msg_buffer: &mut msg_buffer::Buffer,
        now: Instant,
    ) -> Result<(), Error> {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.addr_id == addr_id) {
            node.on_msg_received(&kind, now);
            match kind {
                Kind::Response | Kind::Query => {
                    let max_replacement_nodes = self.max_replacement_nodes(now);
                    if self.replacement_nodes.len() > max_replacement_nodes {
                        self.replacement_nodes.drain(max_replacement_nodes..);
                    }
                    self.sort_node_ids(now);
                    self.ping_least_recently_seen_questionable_node(
                        pivot, config, tx_manager, msg_buffer, now,
                    )?;
                    self.update_expected_change_deadline();
                }
                Kind::Error | Kind::Unknown(_) => match node.state_with_now(now) {
                    RemoteState::Good => {
                        self.sort_node_ids(now);
                    }
                    RemoteState::Questionable => {
                        self.sort_node_ids(now);
                        self.ping_least_recently_seen_questionable_node(
                            pivot, config, tx_manager, msg_buffer, now,
                        )?;
                    }
                    RemoteState::Bad => {
                        if let Some(mut replacement_node) = self.replacement_nodes.pop() {
                            std::mem::swap(node, &mut replacement_node);
                            self.update_expected_change_deadline();
                        }
                        self.sort_node_ids(now);
                    }
                },
            }
            return Ok(());
        }

        if matches!(kind, Kind::Unknown(_)) {
            return Ok(());
        }

        if self.nodes.len() < max_nodes_per_bucket {
            let mut node = RemoteNode::with_addr_id(addr_id);
            node.on_msg_received(&kind, now);
            self.nodes.push(node);
            self.sort_node_ids(now);
            self.update_expected_change_deadline();
        } else if let Some(pos) = self
            .nodes
            .iter()
            .rev()
            .position(|n| n.state_with_now(now) == RemoteState::Bad)
        {
            let mut node = RemoteNode::with_addr_id(addr_id);
            node.on_msg_received(&kind, now);
            self.nodes[pos] = node;
            self.sort_node_ids(now);
            self.update_expected_change_deadline();
        } else if self.replacement_nodes.len() < self.max_replacement_nodes(now) {
            let mut node = RemoteNode::with_addr_id(addr_id);
            node.on_msg_received(&kind, now);
            self.replacement_nodes.push(node);
            self.sort_node_ids(now);
            self.ping_least_recently_seen_questionable_node(
                pivot, config, tx_manager, msg_buffer, now,
            )?;
        }
        Ok(())
    }

    fn on_resp_timeout(
        &mut self,
        addr_id: AddrId<A>,
        pivot: Id,
        config: &Config,
        tx_manager: &mut transaction::Manager,
        msg_buffer: &mut msg_buffer::Buffer,
        now: Instant,
    ) -> Result<(), Error> {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.addr_id == addr_id) {
            node.on_resp_timeout();
            match node.state_with_now(now) {
                RemoteState::Good => {}
                RemoteState::Questionable => {
                    self.sort_node_ids(now);
                    self.ping_least_recently_seen_questionable_node(
                        pivot, config, tx_manager, msg_buffer, now,
                    )?;
                }
                RemoteState::Bad => {
                    if let Some(mut replacement_node) = self.replacement_nodes.pop() {
                        std::mem::swap(node, &mut replacement_node);
                        self.update_expected_change_deadline();
                    }
                    self.sort_node_ids(now);
                }
            }
        }
        Ok(())
    }

    fn split(self, max_nodes_per_bucket: usize) -> (Bucket<A>, Bucket<A>) {
        let middle = self.range.end().middle(self.range.start());

        let mut lower_bucket = Bucket::new(*self.range.start()..=middle, max_nodes_per_bucket);
        let mut upper_bucket = Bucket::new(middle.next()..=*self.range.end(), max_nodes_per_bucket);

        for node in self.nodes {
            let node_id = node.addr_id.id().expect("bucketed node has an id");
            if lower_bucket.range.contains(&node_id) {
                lower_bucket.nodes.push(node);
            } else {
                upper_bucket.nodes.push(node);
            }
        }

        for node in self.replacement_nodes {
            let node_id = node.addr_id.id().expect("bucketed node has an id");
            if lower_bucket.range.contains(&node_id) {
                lower_bucket.replacement_nodes.push(node);
            } else {
                upper_bucket.replacement_nodes.push(node);
            }
        }

        (lower_bucket, upper_bucket)
    }

    fn prioritized_addr_ids(&self, now: Instant) -> impl Iterator<Item = AddrId<A>> + '_ {
        self.nodes
            .iter()
            .filter(move |n| {
                matches!(
                    n.state_with_now(now),
                    RemoteState::Questionable | RemoteState::Good
                )
            })
            .map(|n| n.addr_id)
    }

    fn sort_node_ids(&mut self, now: Instant) {
        self.nodes.sort_unstable_by(|a, b| {
            match (a.state_with_now(now), b.state_with_now(now)) {
                (RemoteState::Good, RemoteState::Questionable)
                | (RemoteState::Good, RemoteState::Bad)
                | (RemoteState::Questionable, RemoteState::Bad) => return Ordering::Less,
                (RemoteState::Questionable, RemoteState::Good)
                | (RemoteState::Bad, RemoteState::Questionable)
                | (RemoteState::Bad, RemoteState::Good) => return Ordering::Greater,
                _ => {}
            }
            match (a.next_msg_deadline(), b.next_msg_deadline()) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(first), Some(second)) => second.cmp(&first),
            }
        });
    }
}

/// A single-address-family routing table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Table<A: Addr> {
    pivot: Id,
    buckets: Vec<Bucket<A>>,
    max_nodes_per_bucket: usize,
}

impl<A: Addr + Into<SocketAddr>> Table<A> {
    pub(crate) fn new(pivot: Id, max_nodes_per_bucket: usize, existing: &[AddrId<A>]) -> Self {
        let mut table = Self {
            pivot,
            buckets: vec![Bucket::new(Id::min()..=Id::max(), max_nodes_per_bucket)],
            max_nodes_per_bucket,
        };
        let now = Instant::now();
        for addr_id in existing {
            table.try_insert(*addr_id, now);
        }
        table
    }

    fn try_insert(&mut self, addr_id: AddrId<A>, now: Instant) {
        let Some(node_id) = addr_id.id() else {
            return;
        };
        if node_id == self.pivot {
            return;
        }

        let idx = self
            .buckets
            .iter()
            .position(|b| b.range.contains(&node_id))
            .expect("bucket should always exist for a node");
        if self.buckets[idx].range.contains(&self.pivot)
            && self.buckets[idx].nodes.len() >= self.max_nodes_per_bucket
            && idx == self.buckets.len() - 1
        {
            self.split_last_bucket_and_insert(node_id, addr_id, now);
        } else {
            self.buckets[idx].try_insert(self.max_nodes_per_bucket, addr_id, now);
        }
    }

    fn split_last_bucket_and_insert(&mut self, node_id: Id, addr_id: AddrId<A>, now: Instant) {
        let bucket = self.buckets.pop().expect("last bucket should always exist");
        let (mut first_bucket, mut second_bucket) = bucket.split(self.max_nodes_per_bucket);
        if first_bucket.range.contains(&node_id) {
            first_bucket.try_insert(self.max_nodes_per_bucket, addr_id, now);
        } else {
            second_bucket.try_insert(self.max_nodes_per_bucket, addr_id, now);
        }

        if first_bucket.range.contains(&self.pivot) {
            self.buckets.push(second_bucket);
            self.buckets.push(first_bucket);
        } else {
            self.buckets.push(first_bucket);
            self.buckets.push(second_bucket);
        }
    }

    /// Total number of nodes held across every bucket, for operational
    /// status reporting.
    pub(crate) fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.nodes.len()).sum()
    }

    pub(crate) fn find_neighbors(&self, id: Id, now: Instant) -> impl Iterator<Item = AddrId<A>> + '_ {
        let idx = self
            .buckets
            .iter()
            .position(|b| b.range.contains(&id))
            .expect("bucket index should always exist for a node id");
        self.buckets[0..=idx]
            .iter()
            .rev()
            .chain(self.buckets[idx..self.buckets.len()].iter())
            .flat_map(move |b| b.prioritized_addr_ids(now))
    }

    pub(crate) fn on_msg_received(
        &mut self,
        addr_id: AddrId<A>,
        kind: Kind<'_>,
        config: &Config,
        tx_manager: &mut transaction::Manager,
        msg_buffer: &mut msg_buffer::Buffer,
        now: Instant,
    ) -> Result<(), Error> {
        let Some(node_id) = addr_id.id() else {
            return Ok(());
        };
        if node_id == self.pivot {
            return Ok(());
        }

        let idx = self
            .buckets
            .iter()
            .position(|b| b.range.contains(&node_id))
            .expect("bucket should always exist for a node");
        if self.buckets[idx].range.contains(&self.pivot)
            && self.buckets[idx].nodes.len() >= self.max_nodes_per_bucket
            && idx == self.buckets.len() - 1
        {
            let bucket = self.buckets.pop().expect("last bucket should always exist");
            let (mut first_bucket, mut second_bucket) = bucket.split(self.max_nodes_per_bucket);
            let result = if first_bucket.range.contains(&node_id) {
                first_bucket.on_msg_received(
                    self.max_nodes_per_bucket,
                    addr_id,
                    kind,
                    self.pivot,
                    config,
                    tx_manager,
                    msg_buffer,
                    now,
                )
            } else {
                second_bucket.on_msg_received(
                    self.max_nodes_per_bucket,
                    addr_id,
                    kind,
                    self.pivot,
                    config,
                    tx_manager,
                    msg_buffer,
                    now,
                )
            };

            if first_bucket.range.contains(&self.pivot) {
                self.buckets.push(second_bucket);
                self.buckets.push(first_bucket);
            } else {
                self.buckets.push(first_bucket);
                self.buckets.push(second_bucket);
            }
            result
        } else {
            self.buckets[idx].on_msg_received(
                self.max_nodes_per_bucket,
                addr_id,
                kind,
                self.pivot,
                config,
                tx_manager,
                msg_buffer,
                now,
            )
        }
    }

    pub(crate) fn on_resp_timeout(
        &mut self,
        addr_id: AddrId<A>,
        config: &Config,
        tx_manager: &mut transaction::Manager,
        msg_buffer: &mut msg_buffer::Buffer,
        now: Instant,
    ) -> Result<(), Error> {
        if let Some(node_id) = addr_id.id() {
            let idx = self
                .buckets
                .iter()
                .position(|b| b.range.contains(&node_id))
                .expect("bucket should always exist for a node");
            self.buckets[idx]
                .on_resp_timeout(addr_id, self.pivot, config, tx_manager, msg_buffer, now)?;
        }
        Ok(())
    }

    pub(crate) fn timeout(&self) -> Option<Instant> {
        self.buckets.iter().map(|b| b.expected_change_deadline).min()
    }

    /// Starts a refreshing `find_node` for any bucket whose
    /// `expected_change_deadline` has elapsed (spec §4.5).
    pub(crate) fn on_timeout(&mut self, now: Instant) -> Result<Vec<Id>, Error> {
        let target_ids = self
            .buckets
            .iter_mut()
            .filter(|b| b.expected_change_deadline <= now)
            .map(|b| {
                b.expected_change_deadline = now + EXPECT_CHANGE_INTERVAL;
                Id::rand_in_inclusive_range(&b.range)
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(bucket_count = self.buckets.len(), "routing table timeout sweep");
        Ok(target_ids)
    }
}

/// Starts an iterative `find_node` toward `target_id`, seeded from the
/// table's own neighbors plus any caller-supplied bootstrap contacts.
fn start_find_node<A: Addr + Into<SocketAddr>>(
    neighbors: impl Iterator<Item = AddrId<A>>,
    target_id: Id,
    bootstrap_nodes: &[AddrId<SocketAddr>],
    config: &Config,
    tx_manager: &mut transaction::Manager,
    msg_buffer: &mut msg_buffer::Buffer,
    find_node_ops: &mut Vec<FindNodeOp>,
) -> Result<(), Error> {
    let mut candidates: Vec<AddrId<SocketAddr>> = neighbors
        .take(8)
        .map(|c| AddrId::with_addr_and_id(c.addr().into(), c.id()))
        .collect();
    candidates.extend(bootstrap_nodes.iter().copied());
    let mut op = FindNodeOp::with_target_id_and_neighbors(target_id, candidates);
    op.start(config, tx_manager, msg_buffer)?;
    find_node_ops.push(op);
    Ok(())
}

/// The routing table(s) maintained by a node, shaped by which address
/// families it supports (spec §1/§4.1: a node may run dual-stack).
#[derive(Clone, Debug)]
pub(crate) enum RoutingTable {
    Ipv4(Table<SocketAddrV4>),
    Ipv6(Table<SocketAddrV6>),
    Ipv4AndIpv6(Table<SocketAddrV4>, Table<SocketAddrV6>),
}

impl RoutingTable {
    /// Total number of nodes held across every configured table, for
    /// operational status reporting.
    pub(crate) fn len(&self) -> usize {
        match self {
            RoutingTable::Ipv4(t) => t.len(),
            RoutingTable::Ipv6(t) => t.len(),
            RoutingTable::Ipv4AndIpv6(t4, t6) => t4.len() + t6.len(),
        }
    }

    pub(crate) fn find_neighbors(&self, id: Id, now: Instant) -> Vec<AddrId<SocketAddr>> {
        match self {
            RoutingTable::Ipv4(t) => t.find_neighbors(id, now).map(AddrId::to_unified).collect(),
            RoutingTable::Ipv6(t) => t.find_neighbors(id, now).map(AddrId::to_unified).collect(),
            RoutingTable::Ipv4AndIpv6(t4, t6) => t4
                .find_neighbors(id, now)
                .map(AddrId::to_unified)
                .chain(t6.find_neighbors(id, now).map(AddrId::to_unified))
                .collect(),
        }
    }

    /// Neighbors from the IPv4 table only, nearest first (spec §4.8
    /// `find_node`/`get_peers` handlers answering a `want: n4` request).
    pub(crate) fn find_neighbors_v4(&self, id: Id, now: Instant) -> Vec<AddrId<SocketAddrV4>> {
        match self {
            RoutingTable::Ipv4(t) | RoutingTable::Ipv4AndIpv6(t, _) => {
                t.find_neighbors(id, now).collect()
            }
            RoutingTable::Ipv6(_) => Vec::new(),
        }
    }

    /// Neighbors from the IPv6 table only, nearest first.
    pub(crate) fn find_neighbors_v6(&self, id: Id, now: Instant) -> Vec<AddrId<SocketAddrV6>> {
        match self {
            RoutingTable::Ipv6(t) | RoutingTable::Ipv4AndIpv6(_, t) => {
                t.find_neighbors(id, now).collect()
            }
            RoutingTable::Ipv4(_) => Vec::new(),
        }
    }

    /// Encodes up to 8 nearest IPv4 neighbors as a compact `nodes` value
    /// (spec §4.3/§4.8). Entries without a known id are skipped since a
    /// compact node entry requires one.
    pub(crate) fn encode_neighbors_v4(&self, id: Id, now: Instant) -> Vec<u8> {
        let neighbors: Vec<(Id, SocketAddrV4)> = self
            .find_neighbors_v4(id, now)
            .into_iter()
            .take(8)
            .filter_map(|a| a.id().map(|node_id| (node_id, a.addr())))
            .collect();
        crate::krpc::compact::encode_nodes(neighbors.iter().map(|(node_id, addr)| (*node_id, addr)))
    }

    /// Encodes up to 8 nearest IPv6 neighbors as a compact `nodes6` value.
    pub(crate) fn encode_neighbors_v6(&self, id: Id, now: Instant) -> Vec<u8> {
        let neighbors: Vec<(Id, SocketAddrV6)> = self
            .find_neighbors_v6(id, now)
            .into_iter()
            .take(8)
            .filter_map(|a| a.id().map(|node_id| (node_id, a.addr())))
            .collect();
        crate::krpc::compact::encode_nodes(neighbors.iter().map(|(node_id, addr)| (*node_id, addr)))
    }

    pub(crate) fn on_msg_received(
        &mut self,
        addr_id: AddrId<SocketAddr>,
        kind: Kind<'_>,
        config: &Config,
        tx_manager: &mut transaction::Manager,
        msg_buffer: &mut msg_buffer::Buffer,
        now: Instant,
    ) -> Result<(), Error> {
        match (self, addr_id.addr()) {
            (RoutingTable::Ipv4(t), SocketAddr::V4(a))
            | (RoutingTable::Ipv4AndIpv6(t, _), SocketAddr::V4(a)) => t.on_msg_received(
                AddrId::with_addr_and_id(a, addr_id.id()),
                kind,
                config,
                tx_manager,
                msg_buffer,
                now,
            ),
            (RoutingTable::Ipv6(t), SocketAddr::V6(a))
            | (RoutingTable::Ipv4AndIpv6(_, t), SocketAddr::V6(a)) => t.on_msg_received(
                AddrId::with_addr_and_id(a, addr_id.id()),
                kind,
                config,
                tx_manager,
                msg_buffer,
                now,
            ),
            _ => Ok(()),
        }
    }

    pub(crate) fn on_resp_timeout(
        &mut self,
        addr_id: AddrId<SocketAddr>,
        config: &Config,
        tx_manager: &mut transaction::Manager,
        msg_buffer: &mut msg_buffer::Buffer,
        now: Instant,
    ) -> Result<(), Error> {
        match (self, addr_id.addr()) {
            (RoutingTable::Ipv4(t), SocketAddr::V4(a))
            | (RoutingTable::Ipv4AndIpv6(t, _), SocketAddr::V4(a)) => {
                t.on_resp_timeout(AddrId::with_addr_and_id(a, addr_id.id()), config, tx_manager, msg_buffer, now)
            }
            (RoutingTable::Ipv6(t), SocketAddr::V6(a))
            | (RoutingTable::Ipv4AndIpv6(_, t), SocketAddr::V6(a)) => {
                t.on_resp_timeout(AddrId::with_addr_and_id(a, addr_id.id()), config, tx_manager, msg_buffer, now)
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn timeout(&self) -> Option<Instant> {
        match self {
            RoutingTable::Ipv4(t) => t.timeout(),
            RoutingTable::Ipv6(t) => t.timeout(),
            RoutingTable::Ipv4AndIpv6(t4, t6) => match (t4.timeout(), t6.timeout()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            },
        }
    }

    /// Starts a refreshing `find_node` for every bucket across the
    /// table(s) whose change deadline has elapsed.
    pub(crate) fn on_timeout(
        &mut self,
        config: &Config,
        tx_manager: &mut transaction::Manager,
        msg_buffer: &mut msg_buffer::Buffer,
        find_node_ops: &mut Vec<FindNodeOp>,
        now: Instant,
    ) -> Result<(), Error> {
        match self {
            RoutingTable::Ipv4(t) => {
                let targets = t.on_timeout(now)?;
                for target_id in targets {
                    start_find_node(
                        t.find_neighbors(target_id, now),
                        target_id,
                        &[],
                        config,
                        tx_manager,
                        msg_buffer,
                        find_node_ops,
                    )?;
                }
            }
            RoutingTable::Ipv6(t) => {
                let targets = t.on_timeout(now)?;
                for target_id in targets {
                    start_find_node(
                        t.find_neighbors(target_id, now),
                        target_id,
                        &[],
                        config,
                        tx_manager,
                        msg_buffer,
                        find_node_ops,
                    )?;
                }
            }
            RoutingTable::Ipv4AndIpv6(t4, t6) => {
                let targets4 = t4.on_timeout(now)?;
                for target_id in targets4 {
                    start_find_node(
                        t4.find_neighbors(target_id, now),
                        target_id,
                        &[],
                        config,
                        tx_manager,
                        msg_buffer,
                        find_node_ops,
                    )?;
                }
                let targets6 = t6.on_timeout(now)?;
                for target_id in targets6 {
                    start_find_node(
                        t6.find_neighbors(target_id, now),
                        target_id,
                        &[],
                        config,
                        tx_manager,
                        msg_buffer,
                        find_node_ops,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Starts an iterative `find_node` toward `target_id`, combining
    /// neighbors from every address family this table carries with any
    /// caller-supplied bootstrap contacts (spec §4.9).
    pub(crate) fn find_node(
        &self,
        target_id: Id,
        bootstrap_nodes: &[AddrId<SocketAddr>],
        config: &Config,
        tx_manager: &mut transaction::Manager,
        msg_buffer: &mut msg_buffer::Buffer,
        find_node_ops: &mut Vec<FindNodeOp>,
        now: Instant,
    ) -> Result<(), Error> {
        match self {
            RoutingTable::Ipv4(t) => start_find_node(
                t.find_neighbors(target_id, now),
                target_id,
                bootstrap_nodes,
                config,
                tx_manager,
                msg_buffer,
                find_node_ops,
            ),
            RoutingTable::Ipv6(t) => start_find_node(
                t.find_neighbors(target_id, now),
                target_id,
                bootstrap_nodes,
                config,
                tx_manager,
                msg_buffer,
                find_node_ops,
            ),
            RoutingTable::Ipv4AndIpv6(t4, t6) => {
                let neighbors = t4
                    .find_neighbors(target_id, now)
                    .map(AddrId::to_unified)
                    .chain(t6.find_neighbors(target_id, now).map(AddrId::to_unified))
                    .collect::<Vec<_>>();
                start_find_node(
                    neighbors.into_iter(),
                    target_id,
                    bootstrap_nodes,
                    config,
                    tx_manager,
                    msg_buffer,
                    find_node_ops,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), port)
    }

    #[test]
    fn new_table_seeds_existing_contacts() {
        let pivot = Id::rand().unwrap();
        let existing = [AddrId::with_addr_and_id(addr(6881), Some(Id::rand().unwrap()))];
        let table = Table::new(pivot, 8, &existing);
        let now = Instant::now();
        let found: Vec<_> = table.find_neighbors(pivot, now).collect();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn bucket_containing_pivot_splits_once_full() {
        let pivot = Id::min();
        let mut table: Table<SocketAddrV4> = Table::new(pivot, 2, &[]);
        let now = Instant::now();
        let mut id = Id::max();
        for i in 0..5u16 {
            table.try_insert(AddrId::with_addr_and_id(addr(6880 + i), Some(id)), now);
            id = id.prev();
        }
        assert!(table.buckets.len() > 1);
    }
}
