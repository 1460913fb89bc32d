// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Outstanding-query bookkeeping (spec §3/§4.6): a transaction id binds
//! a query this node sent to the response, error, or timeout that
//! eventually completes it.

use crate::{error::Error, node::Id};
use rand::RngCore;
use serde_bytes::ByteBuf;
use std::{
    collections::HashMap,
    convert::{TryFrom, TryInto},
    net::SocketAddr,
    time::{Duration, Instant},
};

/// A 16-bit transaction id. Spec §4.6 models this as an index into a
/// fixed array of 65536 slots; a `HashMap` keyed by `Id` is the direct
/// idiomatic equivalent without actually allocating 65536 slots.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Id(u16);

impl Id {
    #[must_use]
    fn next(self) -> Self {
        let (next_id, _) = self.0.overflowing_add(1);
        Id(next_id)
    }

    #[must_use]
    pub fn to_bytebuf(self) -> ByteBuf {
        ByteBuf::from(self.0.to_be_bytes().to_vec())
    }
}

impl TryFrom<&ByteBuf> for Id {
    type Error = Error;

    fn try_from(bytes: &ByteBuf) -> Result<Self, Self::Error> {
        if bytes.len() != 2 {
            return Err(Error::InvalidLocalTransactionId);
        }
        let (int_bytes, _) = bytes.split_at(std::mem::size_of::<u16>());
        let int_bytes: [u8; 2] = int_bytes
            .try_into()
            .map_err(|_| Error::InvalidLocalTransactionId)?;
        Ok(Id(u16::from_be_bytes(int_bytes)))
    }
}

/// A query this node sent and is waiting on a response, error, or
/// timeout for.
#[derive(Clone, Debug)]
pub(crate) struct Transaction {
    pub(crate) tx_id: Id,
    pub(crate) addr: SocketAddr,
    pub(crate) node_id: Option<Id>,
    pub(crate) query_method: &'static str,
    pub(crate) sent: Instant,
    pub(crate) deadline: Instant,
}

impl Transaction {
    /// Whether `candidate`, the node id carried by an inbound response,
    /// is consistent with the node id this transaction was sent to (spec
    /// §4.7: "require `r.id` present; ... if a known NodeID was
    /// expected, require it equals r.id"). `candidate` missing entirely
    /// is never a match, even for a transaction sent before any NodeID
    /// was known (e.g. a bootstrap ping/find_node).
    #[must_use]
    pub(crate) fn is_node_id_match(&self, candidate: Option<Id>) -> bool {
        match (self.node_id, candidate) {
            (Some(expected), c) => c == Some(expected),
            (None, Some(_)) => true,
            (None, None) => false,
        }
    }
}

/// Owns the table of outstanding transactions and the 16-bit id
/// sequence used to mint new ones.
#[derive(Debug)]
pub(crate) struct Manager {
    next_id: Id,
    txs: HashMap<Id, Transaction>,
}

impl Manager {
    pub(crate) fn new() -> Self {
        let seed = rand::thread_rng().next_u32() as u16;
        Manager {
            next_id: Id(seed),
            txs: HashMap::new(),
        }
    }

    /// Allocates the next transaction id in sequence, wrapping on
    /// overflow. Does not reserve it; callers insert via [`Self::push`].
    pub(crate) fn next_transaction_id(&mut self) -> Id {
        let id = self.next_id;
        self.next_id = self.next_id.next();
        id
    }

    /// Registers an outstanding transaction. Spec §4.6 invariant:
    /// `setupQuery` requires the slot to have been empty.
    pub(crate) fn push(&mut self, tx: Transaction) {
        self.txs.insert(tx.tx_id, tx);
    }

    /// Removes and returns the transaction for `tx_id` if `addr`
    /// matches the address the query was sent to (spec §4.7 inbound
    /// dispatch: responses/errors must come from the registered
    /// address). Single-shot: a second call for the same id sees
    /// nothing, which is the map equivalent of "slot already empty."
    pub(crate) fn remove(&mut self, tx_id: &ByteBuf, addr: SocketAddr) -> Option<Transaction> {
        let id = Id::try_from(tx_id).ok()?;
        let tx = self.txs.get(&id)?;
        if tx.addr != addr {
            return None;
        }
        self.txs.remove(&id)
    }

    /// Removes and returns the transaction for `tx_id` regardless of
    /// address, reporting a mismatch instead of silently ignoring it
    /// (spec §4.7: "address mismatch -> report UnknownAddress").
    pub(crate) fn remove_checking_addr(
        &mut self,
        tx_id: &ByteBuf,
        addr: SocketAddr,
    ) -> Result<Option<Transaction>, Error> {
        let id = match Id::try_from(tx_id) {
            Ok(id) => id,
            Err(_) => return Ok(None),
        };
        match self.txs.get(&id) {
            Some(tx) if tx.addr == addr => Ok(self.txs.remove(&id)),
            Some(_) => Err(Error::ReceivedResponseFromUnknownAddress),
            None => Ok(None),
        }
    }

    pub(crate) fn timed_out_txs(&mut self, now: Instant) -> Option<Vec<Transaction>> {
        let expired_ids: Vec<Id> = self
            .txs
            .iter()
            .filter(|(_, tx)| tx.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        if expired_ids.is_empty() {
            return None;
        }
        Some(
            expired_ids
                .into_iter()
                .filter_map(|id| self.txs.remove(&id))
                .collect(),
        )
    }

    /// The soonest deadline among all outstanding transactions, feeding
    /// [`crate::Dht::timeout`].
    pub(crate) fn timeout(&self) -> Option<Instant> {
        self.txs.values().map(|tx| tx.deadline).min()
    }

    pub(crate) fn len(&self) -> usize {
        self.txs.len()
    }

    /// Completes every outstanding transaction with `Cancelled` (spec
    /// §4.6/§5 `Node.cancel()`).
    pub(crate) fn cancel_all(&mut self) -> Vec<Transaction> {
        self.txs.drain().map(|(_, tx)| tx).collect()
    }
}

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn addr() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881))
    }

    fn tx(id: Id, now: Instant) -> Transaction {
        Transaction {
            tx_id: id,
            addr: addr(),
            node_id: None,
            query_method: "ping",
            sent: now,
            deadline: now + Duration::from_secs(30),
        }
    }

    #[test]
    fn remove_is_single_shot() {
        let mut manager = Manager::new();
        let id = manager.next_transaction_id();
        manager.push(tx(id, Instant::now()));
        assert!(manager.remove(&id.to_bytebuf(), addr()).is_some());
        assert!(manager.remove(&id.to_bytebuf(), addr()).is_none());
    }

    #[test]
    fn remove_rejects_mismatched_address() {
        let mut manager = Manager::new();
        let id = manager.next_transaction_id();
        manager.push(tx(id, Instant::now()));
        let other_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 53));
        assert!(manager.remove(&id.to_bytebuf(), other_addr).is_none());
        // Still present for the correct address.
        assert!(manager.remove(&id.to_bytebuf(), addr()).is_some());
    }

    #[test]
    fn remove_checking_addr_reports_mismatch() {
        let mut manager = Manager::new();
        let id = manager.next_transaction_id();
        manager.push(tx(id, Instant::now()));
        let other_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 53));
        let result = manager.remove_checking_addr(&id.to_bytebuf(), other_addr);
        assert_eq!(result.unwrap_err(), Error::ReceivedResponseFromUnknownAddress);
    }

    #[test]
    fn timed_out_txs_returns_only_expired() {
        let mut manager = Manager::new();
        let now = Instant::now();
        let expired_id = manager.next_transaction_id();
        let mut expired = tx(expired_id, now);
        expired.deadline = now - Duration::from_secs(1);
        manager.push(expired);

        let live_id = manager.next_transaction_id();
        manager.push(tx(live_id, now));

        let expired_txs = manager.timed_out_txs(now).unwrap();
        assert_eq!(expired_txs.len(), 1);
        assert_eq!(expired_txs[0].tx_id, expired_id);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn cancel_all_drains_every_transaction() {
        let mut manager = Manager::new();
        for _ in 0..3 {
            let id = manager.next_transaction_id();
            manager.push(tx(id, Instant::now()));
        }
        assert_eq!(manager.cancel_all().len(), 3);
        assert_eq!(manager.len(), 0);
    }
}
