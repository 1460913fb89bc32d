// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `FindNode` operation (spec §4.9): iteratively queries candidates
//! toward `target`, folding newly-discovered neighbors into the
//! frontier until it is exhausted or `max_found` is reached.

use crate::{
    error::Error,
    krpc::{
        find_node::{FindNodeQueryArgs, FindNodeRespVal},
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
pub struct FindNodeOp {
    target: Id,
    remaining: Vec<AddrId<SocketAddr>>,
    queried: HashSet<SocketAddr>,
    found: Vec<AddrId<SocketAddr>>,
    max_found: usize,
    want: Option<Vec<String>>,
    timeout: Option<Duration>,
    tx_id: Option<transaction::Id>,
    step: Step<Vec<AddrId<SocketAddr>>>,
}

const DEFAULT_MAX_FOUND: usize = 8;

impl FindNodeOp {
    #[must_use]
    pub fn with_target_id_and_neighbors(
        target: Id,
        bootstrap: Vec<AddrId<SocketAddr>>,
    ) -> Self {
        let mut remaining = bootstrap;
        remaining.reverse();
        FindNodeOp {
            target,
            remaining,
            queried: HashSet::new(),
            found: Vec::new(),
            max_found: DEFAULT_MAX_FOUND,
            want: None,
            timeout: None,
            tx_id: None,
            step: Step::Setup,
        }
    }

    #[must_use]
    pub fn with_max_found(mut self, max_found: usize) -> Self {
        self.max_found = max_found;
        self
    }

    #[must_use]
    pub fn with_want(mut self, want: Vec<String>) -> Self {
        self.want = Some(want);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn target(&self) -> Id {
        self.target
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.step.is_done()
    }

    #[must_use]
    pub fn step(&self) -> &Step<Vec<AddrId<SocketAddr>>> {
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
            if self.found.len() >= self.max_found {
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

            let mut args = FindNodeQueryArgs::with_id_and_target(
                config.pivot_or_err(candidate.addr())?,
                self.target,
            );
            if let Some(want) = &self.want {
                args.set_want(want.clone());
            }
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
        let mut found = std::mem::take(&mut self.found);
        let target = self.target;
        found.sort_by(|a, b| match (a.id(), b.id()) {
            (Some(ai), Some(bi)) => target.distance(&ai).cmp(&target.distance(&bi)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
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
                self.found
                    .push(AddrId::with_addr_and_id(tx.addr, responder_id.or(tx.node_id)));
                if let Some(values) = value.values() {
                    if let Ok(resp) = FindNodeRespVal::try_from(values) {
                        self.fold_in_neighbors(&resp, config);
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

    fn fold_in_neighbors(&mut self, resp: &FindNodeRespVal, config: &Config) {
        for n in resp.nodes() {
            self.maybe_add_candidate(n.to_unified(), config.ipv4_node_id);
        }
        for n in resp.nodes6() {
            self.maybe_add_candidate(n.to_unified(), config.ipv6_node_id);
        }
        let target = self.target;
        self.remaining.sort_by(|a, b| match (a.id(), b.id()) {
            (Some(ai), Some(bi)) => target.distance(&ai).cmp(&target.distance(&bi)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
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

    /// Completes the outstanding transaction (if any) with `Cancelled`,
    /// transitioning this operation to `cancelled` (spec §4.9/§5).
    pub fn cancel(&mut self) {
        if !self.step.is_done() {
            self.step = Step::Cancelled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::krpc::find_node::FindNodeRespVal;
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
    fn completes_when_bootstrap_exhausted() {
        let config = config();
        let mut tx_manager = transaction::Manager::new();
        let mut msg_buffer = msg_buffer::Buffer::new();
        let bootstrap = vec![AddrId::from(addr(6881))];
        let mut op = FindNodeOp::with_target_id_and_neighbors(Id::rand().unwrap(), bootstrap);
        op.start(&config, &mut tx_manager, &mut msg_buffer).unwrap();
        let tx_id = op.tx_id.unwrap();

        let tx = transaction::Transaction {
            tx_id,
            addr: addr(6881),
            node_id: None,
            query_method: "find_node",
            sent: Instant::now(),
            deadline: Instant::now() + Duration::from_secs(30),
        };
        op.handle(&tx, Event::Timeout, &config, &mut tx_manager, &mut msg_buffer)
            .unwrap();
        assert!(op.is_done());
    }

    #[test]
    fn discovered_neighbors_extend_the_frontier() {
        let config = config();
        let mut tx_manager = transaction::Manager::new();
        let mut msg_buffer = msg_buffer::Buffer::new();
        let target = Id::rand().unwrap();
        let bootstrap = vec![AddrId::from(addr(6881))];
        let mut op = FindNodeOp::with_target_id_and_neighbors(target, bootstrap).with_max_found(2);
        op.start(&config, &mut tx_manager, &mut msg_buffer).unwrap();
        let tx_id = op.tx_id.unwrap();

        let neighbor_id = Id::rand().unwrap();
        let neighbor_addr = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 6882);
        let mut resp = FindNodeRespVal::with_id(Id::rand().unwrap());
        resp.set_nodes(crate::krpc::compact::encode_nodes(std::iter::once((
            neighbor_id,
            &neighbor_addr,
        ))));
        let value = resp.to_value();

        let tx = transaction::Transaction {
            tx_id,
            addr: addr(6881),
            node_id: None,
            query_method: "find_node",
            sent: Instant::now(),
            deadline: Instant::now() + Duration::from_secs(30),
        };
        op.handle(&tx, Event::Resp(&value), &config, &mut tx_manager, &mut msg_buffer)
            .unwrap();
        // The op should have advanced and queried the newly found neighbor.
        assert!(op.queried.contains(&SocketAddr::V4(neighbor_addr)));
    }
}
