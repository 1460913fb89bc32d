// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The outbound/inbound staging buffer (spec §3/§5): queries, responses
//! and errors this node wants to send are appended to `outbound`
//! without touching a socket; the host application drains it with
//! [`Buffer::pop_outbound`] and hands it to whatever transport it uses.
//! Inbound datagrams the host has already read go the other way through
//! `push_inbound`/`pop_inbound`.

use crate::{
    error::Error,
    krpc::{self, ErrorVal, QueryArgs, RespVal},
    node::{Addr, AddrId},
    transaction,
};
use bt_bencode::Value;
use serde_bytes::Bytes;
use std::{
    collections::VecDeque,
    net::SocketAddr,
    time::{Duration, Instant},
};

/// A decoded inbound message, once dispatch has finished with it, handed
/// to the host application through [`crate::Dht::read`].
#[derive(Clone, Debug)]
pub enum Msg {
    Query(Value),
    Resp(Value),
    Error(Value),
    Timeout,
}

/// A fully-dispatched inbound event: the remote's address/id, the
/// transaction it correlated to (absent for queries), and the decoded
/// message itself (spec `Channel.read`, generalized from the teacher's
/// `InboundMsg` name).
#[derive(Clone, Debug)]
pub struct ReadEvent {
    pub addr_id: AddrId<SocketAddr>,
    pub tx_id: Option<transaction::Id>,
    pub msg: Msg,
}

/// Alias kept for callers reading naturally from the host's perspective.
pub type InboundMsg = ReadEvent;

/// A message this node wants to send, staged until the host drains it.
#[derive(Debug)]
pub(crate) struct OutboundMsg {
    pub(crate) tx_id: Option<transaction::Id>,
    pub(crate) addr: SocketAddr,
    pub(crate) msg_data: Vec<u8>,
}

#[derive(Debug, Default)]
pub(crate) struct Buffer {
    inbound: VecDeque<InboundMsg>,
    outbound: VecDeque<OutboundMsg>,
}

fn method_name_str(bytes: &'static [u8]) -> &'static str {
    std::str::from_utf8(bytes).unwrap_or("")
}

impl Buffer {
    pub(crate) fn new() -> Self {
        Self {
            inbound: VecDeque::new(),
            outbound: VecDeque::new(),
        }
    }

    pub(crate) fn push_inbound(&mut self, msg: InboundMsg) {
        self.inbound.push_back(msg);
    }

    pub(crate) fn pop_inbound(&mut self) -> Option<InboundMsg> {
        self.inbound.pop_front()
    }

    #[cfg(test)]
    pub(crate) fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Serializes and stages a query, registering a transaction with
    /// `tx_manager` so the eventual response, error, or timeout can be
    /// correlated back to it (spec §4.6 `setupQuery`).
    pub(crate) fn write_query<A, T>(
        &mut self,
        args: &T,
        addr_id: AddrId<A>,
        timeout: Duration,
        client_version: Option<&[u8]>,
        read_only: bool,
        tx_manager: &mut transaction::Manager,
    ) -> Result<transaction::Id, Error>
    where
        A: Addr + Into<SocketAddr>,
        T: QueryArgs,
    {
        let tx_id = tx_manager.next_transaction_id();
        let addr = addr_id.addr().into();

        let msg_data = encode_query(args, tx_id, client_version, read_only)?;

        tx_manager.push(transaction::Transaction {
            tx_id,
            addr,
            node_id: addr_id.id(),
            query_method: method_name_str(T::method_name()),
            sent: Instant::now(),
            deadline: Instant::now() + timeout,
        });

        self.outbound.push_back(OutboundMsg {
            tx_id: Some(tx_id),
            addr,
            msg_data,
        });
        Ok(tx_id)
    }

    /// Serializes and stages a query without registering a transaction:
    /// used for `announce_peer` follow-ups sent opportunistically during
    /// a `get_peers` traversal, where no reply is awaited (spec §4.9).
    /// The transaction id field is sent empty since nothing correlates
    /// a reply back to this call.
    pub(crate) fn write_query_fire_and_forget<A, T>(
        &mut self,
        args: &T,
        addr_id: AddrId<A>,
        client_version: Option<&[u8]>,
        read_only: bool,
    ) -> Result<(), Error>
    where
        A: Addr + Into<SocketAddr>,
        T: QueryArgs,
    {
        let value = args.to_value();
        let msg_data = bt_bencode::to_vec(&krpc::ser::QueryMsg {
            a: Some(&value),
            q: Bytes::new(T::method_name()),
            ro: read_only.then_some(1),
            t: Bytes::new(b""),
            v: client_version.map(Bytes::new),
            y: Bytes::new(b"q"),
        })
        .map_err(|_| Error::CannotSerializeKrpcMessage)?;
        self.outbound.push_back(OutboundMsg {
            tx_id: None,
            addr: addr_id.addr().into(),
            msg_data,
        });
        Ok(())
    }

    /// Serializes and stages a response. `observed_addr` is stamped as
    /// the BEP 42-adjacent `ip` field so the remote side can learn its
    /// externally-visible address (spec §4.3).
    pub(crate) fn write_resp<A, T>(
        &mut self,
        tx_id_bytes: &[u8],
        resp: &T,
        addr: A,
        observed_addr: Option<&[u8]>,
        client_version: Option<&[u8]>,
    ) -> Result<(), Error>
    where
        A: Addr + Into<SocketAddr>,
        T: RespVal,
    {
        let value = resp.to_value();
        let msg_data = bt_bencode::to_vec(&krpc::ser::RespMsg {
            ip: observed_addr.map(Bytes::new),
            r: Some(&value),
            t: Bytes::new(tx_id_bytes),
            v: client_version.map(Bytes::new),
            y: Bytes::new(b"r"),
        })
        .map_err(|_| Error::CannotSerializeKrpcMessage)?;
        self.outbound.push_back(OutboundMsg {
            tx_id: None,
            addr: addr.into(),
            msg_data,
        });
        Ok(())
    }

    /// Serializes and stages an error reply (spec §4.7/§6).
    pub(crate) fn write_err<A, T>(
        &mut self,
        tx_id_bytes: &[u8],
        details: &T,
        addr: A,
        observed_addr: Option<&[u8]>,
        client_version: Option<&[u8]>,
    ) -> Result<(), Error>
    where
        A: Addr + Into<SocketAddr>,
        T: ErrorVal,
    {
        let value = details.to_value();
        let msg_data = bt_bencode::to_vec(&krpc::ser::ErrMsg {
            e: Some(&value),
            ip: observed_addr.map(Bytes::new),
            t: Bytes::new(tx_id_bytes),
            v: client_version.map(Bytes::new),
            y: Bytes::new(b"e"),
        })
        .map_err(|_| Error::CannotSerializeKrpcMessage)?;
        self.outbound.push_back(OutboundMsg {
            tx_id: None,
            addr: addr.into(),
            msg_data,
        });
        Ok(())
    }

    pub(crate) fn pop_outbound(&mut self) -> Option<OutboundMsg> {
        self.outbound.pop_front()
    }
}

fn encode_query<T: QueryArgs>(
    args: &T,
    tx_id: transaction::Id,
    client_version: Option<&[u8]>,
    read_only: bool,
) -> Result<Vec<u8>, Error> {
    let value: Value = args.to_value();
    let tx_id_bytes = tx_id.to_bytebuf();
    bt_bencode::to_vec(&krpc::ser::QueryMsg {
        a: Some(&value),
        q: Bytes::new(T::method_name()),
        ro: read_only.then_some(1),
        t: Bytes::new(tx_id_bytes.as_ref()),
        v: client_version.map(Bytes::new),
        y: Bytes::new(b"q"),
    })
    .map_err(|_| Error::CannotSerializeKrpcMessage)
}
