// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `GetPeers` operation (spec §4.9): the same iterative-frontier
//! discipline as [`super::find_node::FindNodeOp`], additionally
//! collecting compact peers and optionally following up with
//! `announce_peer` once a response carries a token.

use crate::{
    address_validator,
    error::Error,
    krpc::{
        announce_peer::AnnouncePeerQueryArgs,
        get_peers::{GetPeersQueryArgs, GetPeersRespVal},
        ErrMsg, QueryMsg, RespMsg,
    },
    msg_buffer,
    node::{AddrId, Id},
    ops::{Event, Step},
    transaction, Config,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct GetPeersOp {
    info_hash: Id,
    remaining: Vec<AddrId<SocketAddr>>,
    queried: HashSet<SocketAddr>,
    found_peers: HashSet<SocketAddr>,
    nodes_received_peers_from: usize,
    should_announce: bool,
    torrent_port: Option<u16>,
    max_nodes_to_get_peers_from: usize,
    should_verify_node_ids: bool,
    timeout: Option<Duration>,
    tx_id: Option<transaction::Id>,
    step: Step<HashSet<SocketAddr>>,
}

const DEFAULT_MAX_NODES: usize = 8;

impl GetPeersOp {
    #[must_use]
    pub fn new(info_hash: Id, bootstrap: Vec<AddrId<SocketAddr>>, should_announce: bool) -> Self {
        let mut remaining = bootstrap;
        remaining.reverse();
        GetPeersOp {
            info_hash,
            remaining,
            queried: HashSet::new(),
            found_peers: HashSet::new(),
            nodes_received_peers_from: 0,
            should_announce,
            torrent_port: None,
            max_nodes_to_get_peers_from: DEFAULT_MAX_NODES,
            should_verify_node_ids: true,
            timeout: None,
            tx_id: None,
            step: Step::Setup,
        }
    }

    #[must_use]
    pub fn with_torrent_port(mut self, port: u16) -> Self {
        self.torrent_port = Some(port);
        self
    }

    #[must_use]
    pub fn with_max_nodes_to_get_peers_from(mut self, max: usize) -> Self {
        self.max_nodes_to_get_peers_from = max;
        self
    }

    #[must_use]
    pub fn with_should_verify_node_ids(mut self, verify: bool) -> Self {
        self.should_verify_node_ids = verify;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn info_hash(&self) -> Id {
        self.info_hash
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.step.is_done()
    }

    #[must_use]
    pub fn step(&self) -> &Step<HashSet<SocketAddr>> {
        &self.step
    }

    pub fn start(
        &mut self,
        config: &Config,
        tx_manager: &mut transaction::Manager,
        msg_buffer: &mut msg_buffer::Buffer,
    ) -> Result<(), Error> {
        self.step = Step::Executing;
        self.advance(config, tx_manager, msg_buffer)
    }

    fn should_stop(&self) -> bool {
        self.remaining.is_empty()
            || self.nodes_received_peers_from >= self.max_nodes_to_get_peers_from
    }

    fn advance(
        &mut self,
        config: &Config,
        tx_manager: &mut transaction::Manager,
        msg_buffer: &mut msg_buffer::Buffer,
    ) -> Result<(), Error> {
        if self.step.is_done() {
            return Ok(());
        }
        loop {
            if self.should_stop() {
                self.complete();
                return Ok(());
            }
            let Some(candidate) = self.remaining.pop() else {
                self.complete();
                return Ok(());
            };
            if self.queried.contains(&candidate.addr()) {
                continue;
            }

            let args = GetPeersQueryArgs::with_id_and_info_hash(
                config.pivot_or_err(candidate.addr())?,
                self.info_hash,
            );
            let tx_id = msg_buffer.write_query(
                &args,
                candidate,
                self.timeout.unwrap_or(config.default_query_timeout),
                config.client_version.as_deref(),
                config.is_read_only_node,
                tx_manager,
            )?;
            self.tx_id = Some(tx_id);
            self.queried.insert(candidate.addr());
            return Ok(());
        }
    }

    fn complete(&mut self) {
        let found = std::mem::take(&mut self.found_peers);
        self.step = Step::Completed(found);
    }

    pub fn handle(
        &mut self,
        tx: &transaction::Transaction,
        event: Event<'_>,
        config: &Config,
        tx_manager: &mut transaction::Manager,
        msg_buffer: &mut msg_buffer::Buffer,
    ) -> Result<(), Error> {
        if self.step.is_done() {
            return Ok(());
        }
        if self.tx_id != Some(tx.tx_id) {
            return Ok(());
        }
        match event {
            Event::Resp(value) => {
                let responder_id = value.queried_node_id();
                if let Some(values) = value.values() {
                    if let Ok(resp) = GetPeersRespVal::try_from(values) {
                        self.handle_get_peers_response(tx, responder_id, &resp, config, msg_buffer);
                    }
                }
                self.advance(config, tx_manager, msg_buffer)
            }
            Event::Error(_) | Event::Timeout => self.advance(config, tx_manager, msg_buffer),
            Event::Cancelled => {
                self.step = Step::Cancelled;
                Ok(())
            }
        }
    }

    fn handle_get_peers_response(
        &mut self,
        tx: &transaction::Transaction,
        responder_id: Option<Id>,
        resp: &GetPeersRespVal,
        config: &Config,
        msg_buffer: &mut msg_buffer::Buffer,
    ) {
        for peer in resp.values_v4() {
            self.found_peers.insert(SocketAddr::V4(peer));
        }
        for peer in resp.values_v6() {
            self.found_peers.insert(SocketAddr::V6(peer));
        }

        for n in resp.nodes() {
            self.maybe_add_candidate(n.to_unified(), config.ipv4_node_id);
        }
        for n in resp.nodes6() {
            self.maybe_add_candidate(n.to_unified(), config.ipv6_node_id);
        }

        let remote_id = responder_id.or(tx.node_id);
        let node_id_ok = !self.should_verify_node_ids
            || remote_id
                .map(|id| address_validator::is_valid(tx.addr.ip(), &id))
                .unwrap_or(false);
        if node_id_ok {
            self.nodes_received_peers_from += 1;
        }

        if self.should_announce {
            if let Some(token) = resp.token() {
                let Some(remote_id) = remote_id else {
                    return;
                };
                let Some(own_id) = config.pivot(tx.addr) else {
                    return;
                };
                let args = AnnouncePeerQueryArgs::new(
                    own_id,
                    self.info_hash,
                    token.to_vec(),
                    self.torrent_port,
                );
                let addr_id = AddrId::with_addr_and_id(tx.addr, Some(remote_id));
                let _ = msg_buffer.write_query_fire_and_forget(
                    &args,
                    addr_id,
                    config.client_version.as_deref(),
                    config.is_read_only_node,
                );
            }
        }
    }

    fn maybe_add_candidate(&mut self, candidate: AddrId<SocketAddr>, own_id: Option<Id>) {
        if self.queried.contains(&candidate.addr()) {
            return;
        }
        if own_id.is_some() && candidate.id() == own_id {
            return;
        }
        self.remaining.push(candidate);
    }

    pub fn cancel(&mut self) {
        if !self.step.is_done() {
            self.step = Step::Cancelled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::krpc::RespVal;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::time::Instant;

    fn config() -> Config {
        Config {
            ipv4_node_id: Some(Id::rand().unwrap()),
            ipv6_node_id: None,
            client_version: None,
            default_query_timeout: Duration::from_secs(30),
            is_read_only_node: false,
            max_node_count_per_bucket: 8,
            supported_addr: crate::SupportedAddr::Ipv4,
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), port))
    }

    #[test]
    fn collects_peers_and_stops_at_max_nodes() {
        let config = config();
        let mut tx_manager = transaction::Manager::new();
        let mut msg_buffer = msg_buffer::Buffer::new();
        let bootstrap = vec![AddrId::from(addr(6881))];
        let mut op = GetPeersOp::new(Id::rand().unwrap(), bootstrap, false)
            .with_max_nodes_to_get_peers_from(1)
            .with_should_verify_node_ids(false);
        op.start(&config, &mut tx_manager, &mut msg_buffer).unwrap();
        let tx_id = op.tx_id.unwrap();

        let mut resp = GetPeersRespVal::with_id(Id::rand().unwrap());
        let peer = SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 6881);
        use crate::node::Addr;
        resp.set_values(vec![peer.to_compact()]);
        let value = resp.to_value();

        let tx = transaction::Transaction {
            tx_id,
            addr: addr(6881),
            node_id: None,
            query_method: "get_peers",
            sent: Instant::now(),
            deadline: Instant::now() + Duration::from_secs(30),
        };
        op.handle(&tx, Event::Resp(&value), &config, &mut tx_manager, &mut msg_buffer)
            .unwrap();
        assert!(op.is_done());
        match op.step() {
            Step::Completed(peers) => assert!(peers.contains(&SocketAddr::V4(peer))),
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn announces_when_token_present() {
        let config = config();
        let mut tx_manager = transaction::Manager::new();
        let mut msg_buffer = msg_buffer::Buffer::new();
        let bootstrap = vec![AddrId::with_addr_and_id(addr(6881), Some(Id::rand().unwrap()))];
        let mut op = GetPeersOp::new(Id::rand().unwrap(), bootstrap, true)
            .with_max_nodes_to_get_peers_from(1)
            .with_should_verify_node_ids(false);
        op.start(&config, &mut tx_manager, &mut msg_buffer).unwrap();
        let tx_id = op.tx_id.unwrap();
        let outbound_before = msg_buffer.outbound_len();

        let mut resp = GetPeersRespVal::with_id(Id::rand().unwrap());
        resp.set_token(vec![1, 2, 3]);
        let value = resp.to_value();

        let tx = transaction::Transaction {
            tx_id,
            addr: addr(6881),
            node_id: Some(Id::rand().unwrap()),
            query_method: "get_peers",
            sent: Instant::now(),
            deadline: Instant::now() + Duration::from_secs(30),
        };
        op.handle(&tx, Event::Resp(&value), &config, &mut tx_manager, &mut msg_buffer)
            .unwrap();
        assert!(msg_buffer.outbound_len() > outbound_before);
    }
}
