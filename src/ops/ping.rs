// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `Ping` operation (spec §4.9): send one ping, complete on
//! response, error, timeout, or cancellation.

use crate::{
    error::Error,
    krpc::{ping::PingQueryArgs, ErrMsg, RespMsg},
    msg_buffer,
    node::{AddrId, Id},
    ops::{Event, Step},
    transaction, Config,
};
use std::net::SocketAddr;

#[derive(Clone, Debug)]
pub struct PingOp {
    addr_id: AddrId<SocketAddr>,
    tx_id: Option<transaction::Id>,
    step: Step<AddrId<SocketAddr>>,
}

impl PingOp {
    #[must_use]
    pub fn with_addr_id(addr_id: AddrId<SocketAddr>) -> Self {
        PingOp {
            addr_id,
            tx_id: None,
            step: Step::Setup,
        }
    }

    #[must_use]
    pub fn addr_id(&self) -> AddrId<SocketAddr> {
        self.addr_id
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.step.is_done()
    }

    #[must_use]
    pub fn step(&self) -> &Step<AddrId<SocketAddr>> {
        &self.step
    }

    pub fn start(
        &mut self,
        config: &Config,
        tx_manager: &mut transaction::Manager,
        msg_buffer: &mut msg_buffer::Buffer,
    ) -> Result<(), Error> {
        let args = PingQueryArgs::with_id(config.pivot_or_err(self.addr_id.addr())?);
        let tx_id = msg_buffer.write_query(
            &args,
            self.addr_id,
            config.default_query_timeout,
            config.client_version.as_deref(),
            config.is_read_only_node,
            tx_manager,
        )?;
        self.tx_id = Some(tx_id);
        self.step = Step::Executing;
        Ok(())
    }

    /// Marks this operation cancelled without touching the transaction
    /// table; the caller is expected to have cancelled transactions
    /// separately.
    pub fn cancel(&mut self) {
        if !self.step.is_done() {
            self.step = Step::Cancelled;
        }
    }

    pub fn handle(&mut self, tx: &transaction::Transaction, event: Event<'_>) {
        if self.step.is_done() {
            return;
        }
        if self.tx_id != Some(tx.tx_id) {
            return;
        }
        self.step = match event {
            Event::Resp(value) => {
                let remote_id: Option<Id> = value.queried_node_id();
                Step::Completed(AddrId::with_addr_and_id(
                    self.addr_id.addr(),
                    remote_id.or(self.addr_id.id()),
                ))
            }
            Event::Error(value) => {
                let (code, description) = value
                    .error()
                    .unwrap_or((0, "unknown error".to_string()));
                Step::Failed(Error::ErrorResponse { code, description })
            }
            Event::Timeout => Step::Failed(Error::Timeout),
            Event::Cancelled => Step::Cancelled,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::krpc::ping::PingRespVal;
    use crate::krpc::RespVal;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::time::{Duration, Instant};

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

    fn remote() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881))
    }

    #[test]
    fn completes_on_matching_response() {
        let config = config();
        let mut tx_manager = transaction::Manager::new();
        let mut msg_buffer = msg_buffer::Buffer::new();
        let mut op = PingOp::with_addr_id(AddrId::from(remote()));
        op.start(&config, &mut tx_manager, &mut msg_buffer).unwrap();
        let tx_id = op.tx_id.unwrap();

        let remote_id = Id::rand().unwrap();
        let resp = PingRespVal::with_id(remote_id).to_value();
        let tx = transaction::Transaction {
            tx_id,
            addr: remote(),
            node_id: None,
            query_method: "ping",
            sent: Instant::now(),
            deadline: Instant::now() + Duration::from_secs(30),
        };
        op.handle(&tx, Event::Resp(&resp));
        assert!(op.is_done());
        match op.step() {
            Step::Completed(addr_id) => assert_eq!(addr_id.id(), Some(remote_id)),
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn mismatched_tx_id_is_ignored() {
        let config = config();
        let mut tx_manager = transaction::Manager::new();
        let mut msg_buffer = msg_buffer::Buffer::new();
        let mut op = PingOp::with_addr_id(AddrId::from(remote()));
        op.start(&config, &mut tx_manager, &mut msg_buffer).unwrap();

        let other_tx = transaction::Transaction {
            tx_id: tx_manager.next_transaction_id(),
            addr: remote(),
            node_id: None,
            query_method: "ping",
            sent: Instant::now(),
            deadline: Instant::now() + Duration::from_secs(30),
        };
        op.handle(&other_tx, Event::Timeout);
        assert!(!op.is_done());
    }
}
