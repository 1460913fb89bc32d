// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Torrent info hashes and the peer store backing `get_peers`/`announce_peer`.

use crate::node::Id;
use std::{collections::HashMap, net::SocketAddr};

/// A 160-bit identifier of a swarm. Opaque alias for [`Id`]: both are
/// 160-bit big-endian values with identical operations.
pub type InfoHash = Id;

/// An append-only `info_hash -> peers` mapping (spec §3 "Peer store").
///
/// Duplicate entries for the same peer under the same info hash are
/// permitted at this layer; de-duplication, if wanted, belongs to the
/// caller.
#[derive(Clone, Debug, Default)]
pub struct PeerStore {
    peers: HashMap<InfoHash, Vec<SocketAddr>>,
}

impl PeerStore {
    #[must_use]
    pub fn new() -> Self {
        PeerStore {
            peers: HashMap::new(),
        }
    }

    /// Records `addr` as a peer for `info_hash`.
    pub fn add_peer(&mut self, info_hash: InfoHash, addr: SocketAddr) {
        self.peers.entry(info_hash).or_default().push(addr);
    }

    /// Returns the peers known for `info_hash`, if any.
    #[must_use]
    pub fn peers_for(&self, info_hash: &InfoHash) -> &[SocketAddr] {
        self.peers
            .get(info_hash)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    #[test]
    fn duplicate_peers_are_retained() {
        let mut store = PeerStore::new();
        let info_hash = Id::rand().unwrap();
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 6881));
        store.add_peer(info_hash, addr);
        store.add_peer(info_hash, addr);
        assert_eq!(store.peers_for(&info_hash).len(), 2);
    }

    #[test]
    fn unknown_info_hash_returns_empty() {
        let store = PeerStore::new();
        assert!(store.peers_for(&Id::rand().unwrap()).is_empty());
    }
}
