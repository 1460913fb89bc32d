// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Compact node (20 + addr) and peer (addr-only) list encoding (spec
//! §4.3/§6).

use crate::node::{Addr, AddrId, Id, ID_LEN};

/// Encodes `id || addr.to_compact()` for a single compact node entry.
#[must_use]
pub fn encode_node<A: Addr>(id: Id, addr: &A) -> Vec<u8> {
    let mut out = Vec::with_capacity(ID_LEN + A::compact_len());
    out.extend_from_slice(id.as_ref());
    out.extend_from_slice(&addr.to_compact());
    out
}

/// Encodes a sequence of `(id, addr)` pairs into a single compact node
/// list (the `nodes`/`nodes6` wire field).
pub fn encode_nodes<'a, A: Addr + 'a>(
    nodes: impl IntoIterator<Item = (Id, &'a A)>,
) -> Vec<u8> {
    let mut out = Vec::new();
    for (id, addr) in nodes {
        out.extend_from_slice(&encode_node(id, addr));
    }
    out
}

/// Decodes a compact node list. Per spec §4.3, malformed trailing bytes
/// (a length not a multiple of the element size) decode the whole list
/// as empty rather than a partial, potentially-misaligned result.
#[must_use]
pub fn decode_nodes<A: Addr>(bytes: &[u8]) -> Vec<AddrId<A>> {
    let elem_len = ID_LEN + A::compact_len();
    if elem_len == 0 || bytes.len() % elem_len != 0 {
        return Vec::new();
    }
    bytes
        .chunks_exact(elem_len)
        .filter_map(|chunk| {
            let id = Id::try_from(&chunk[..ID_LEN]).ok()?;
            let addr = A::from_compact(&chunk[ID_LEN..])?;
            Some(AddrId::with_addr_and_id(addr, Some(id)))
        })
        .collect()
}

/// Encodes a sequence of peer addresses into a compact peer list (the
/// `values` wire field).
pub fn encode_peers<'a, A: Addr + 'a>(peers: impl IntoIterator<Item = &'a A>) -> Vec<Vec<u8>> {
    peers.into_iter().map(Addr::to_compact).collect()
}

/// Decodes a single compact peer entry. Per spec §4.3, an entry whose
/// length is not 6 or 18 bytes is skipped by the caller rather than
/// failing the whole list.
#[must_use]
pub fn decode_peer<A: Addr>(bytes: &[u8]) -> Option<A> {
    if bytes.len() != A::compact_len() {
        return None;
    }
    A::from_compact(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Id;
    use std::convert::TryFrom;
    use std::net::{Ipv4Addr, SocketAddrV4};

    #[test]
    fn node_list_round_trips() {
        let entries: Vec<(Id, SocketAddrV4)> = (0..3)
            .map(|i| {
                (
                    Id::rand().unwrap(),
                    SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, i), 6881 + u16::from(i)),
                )
            })
            .collect();
        let encoded = encode_nodes(entries.iter().map(|(id, addr)| (*id, addr)));
        let decoded: Vec<AddrId<SocketAddrV4>> = decode_nodes(&encoded);
        assert_eq!(decoded.len(), entries.len());
        for ((id, addr), decoded) in entries.iter().zip(decoded.iter()) {
            assert_eq!(decoded.id(), Some(*id));
            assert_eq!(decoded.addr(), *addr);
        }
    }

    #[test]
    fn malformed_trailing_bytes_decode_as_empty() {
        let mut encoded = encode_nodes(std::iter::once((
            Id::rand().unwrap(),
            &SocketAddrV4::new(Ipv4Addr::new(1, 1, 1, 1), 1),
        )));
        encoded.push(0);
        let decoded: Vec<AddrId<SocketAddrV4>> = decode_nodes(&encoded);
        assert!(decoded.is_empty());
    }

    #[test]
    fn wrong_size_peer_entry_is_skipped_by_caller() {
        assert!(decode_peer::<SocketAddrV4>(&[1, 2, 3]).is_none());
    }
}
