// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Inbound query handlers (spec §4.8): decode a query's arguments,
//! build the matching response or KRPC error, and stage it on the
//! outbound buffer. `dispatch` is the single entry point the
//! orchestrator calls for every inbound `y=q` message.

use crate::{
    error::Error,
    krpc::{
        announce_peer::{AnnouncePeerQueryArgs, AnnouncePeerRespVal},
        find_node::{FindNodeQueryArgs, FindNodeRespVal, WANT_N4, WANT_N6},
        get_peers::{GetPeersQueryArgs, GetPeersRespVal},
        ping::{PingQueryArgs, PingRespVal},
        announce_peer::METHOD_ANNOUNCE_PEER,
        find_node::METHOD_FIND_NODE,
        get_peers::METHOD_GET_PEERS,
        ping::METHOD_PING,
        ErrorCode, QueryMsg, StdError,
    },
    msg_buffer,
    node::Addr,
    routing::RoutingTable,
    secret, torrent, Config,
};
use bt_bencode::Value;
use serde_bytes::ByteBuf;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::net::SocketAddr;
use std::time::Instant;

/// Decodes `value` as a query, runs the matching handler, and stages a
/// response or error on `msg_buffer`. Returns `true` when a valid
/// response was sent (the caller admits the remote into its routing
/// table), `false` when a KRPC error was sent instead (malformed
/// arguments, invalid token, or an unknown method).
pub(crate) fn dispatch(
    value: &Value,
    addr: SocketAddr,
    tx_id_bytes: &[u8],
    config: &Config,
    routing_table: &RoutingTable,
    secrets: &mut secret::TokenPair,
    peer_store: &mut torrent::PeerStore,
    msg_buffer: &mut msg_buffer::Buffer,
) -> Result<bool, Error> {
    let now = Instant::now();
    let observed_addr = addr.to_compact();
    let client_version = config.client_version.as_deref();

    let Some(method) = QueryMsg::method_name_str(value) else {
        let err = StdError::new(ErrorCode::Protocol, "missing method name");
        msg_buffer.write_err(tx_id_bytes, &err, addr, Some(&observed_addr), client_version)?;
        return Ok(false);
    };
    let Some(args) = QueryMsg::args(value) else {
        let err = StdError::new(ErrorCode::Protocol, "missing arguments");
        msg_buffer.write_err(tx_id_bytes, &err, addr, Some(&observed_addr), client_version)?;
        return Ok(false);
    };

    let result = match method {
        METHOD_PING => handle_ping(args, addr, tx_id_bytes, config, &observed_addr, msg_buffer),
        METHOD_FIND_NODE => handle_find_node(
            args,
            addr,
            tx_id_bytes,
            config,
            routing_table,
            now,
            &observed_addr,
            msg_buffer,
        ),
        METHOD_GET_PEERS => handle_get_peers(
            args,
            addr,
            tx_id_bytes,
            config,
            routing_table,
            secrets,
            peer_store,
            now,
            &observed_addr,
            msg_buffer,
        ),
        METHOD_ANNOUNCE_PEER => handle_announce_peer(
            args,
            addr,
            tx_id_bytes,
            config,
            secrets,
            peer_store,
            &observed_addr,
            msg_buffer,
        ),
        unknown => {
            let err = StdError::new(ErrorCode::MethodUnknown, format!("Method Unknown: {unknown}"));
            msg_buffer.write_err(tx_id_bytes, &err, addr, Some(&observed_addr), client_version)?;
            return Ok(false);
        }
    };

    match result {
        Ok(()) => Ok(true),
        Err(Error::ReceivedMalformedMessage(detail)) => {
            let err = StdError::new(ErrorCode::Protocol, detail);
            msg_buffer.write_err(tx_id_bytes, &err, addr, Some(&observed_addr), client_version)?;
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Resolves which address families to answer with: an explicit `want`
/// list if present, otherwise just the family the query arrived over
/// (spec §4.8).
fn resolve_want(want: Option<&[String]>, addr: SocketAddr) -> (bool, bool) {
    match want {
        Some(list) => (
            list.iter().any(|w| w == WANT_N4),
            list.iter().any(|w| w == WANT_N6),
        ),
        None => match addr {
            SocketAddr::V4(_) => (true, false),
            SocketAddr::V6(_) => (false, true),
        },
    }
}

fn handle_ping(
    args: &BTreeMap<ByteBuf, Value>,
    addr: SocketAddr,
    tx_id_bytes: &[u8],
    config: &Config,
    observed_addr: &[u8],
    msg_buffer: &mut msg_buffer::Buffer,
) -> Result<(), Error> {
    let _ = PingQueryArgs::try_from(args)?;
    let resp = PingRespVal::with_id(config.pivot_or_err(addr)?);
    msg_buffer.write_resp(
        tx_id_bytes,
        &resp,
        addr,
        Some(observed_addr),
        config.client_version.as_deref(),
    )
}

fn handle_find_node(
    args: &BTreeMap<ByteBuf, Value>,
    addr: SocketAddr,
    tx_id_bytes: &[u8],
    config: &Config,
    routing_table: &RoutingTable,
    now: Instant,
    observed_addr: &[u8],
    msg_buffer: &mut msg_buffer::Buffer,
) -> Result<(), Error> {
    let query = FindNodeQueryArgs::try_from(args)?;
    let (want4, want6) = resolve_want(query.want(), addr);
    let mut resp = FindNodeRespVal::with_id(config.pivot_or_err(addr)?);
    if want4 {
        resp.set_nodes(routing_table.encode_neighbors_v4(query.target(), now));
    }
    if want6 {
        resp.set_nodes6(routing_table.encode_neighbors_v6(query.target(), now));
    }
    msg_buffer.write_resp(
        tx_id_bytes,
        &resp,
        addr,
        Some(observed_addr),
        config.client_version.as_deref(),
    )
}

fn handle_get_peers(
    args: &BTreeMap<ByteBuf, Value>,
    addr: SocketAddr,
    tx_id_bytes: &[u8],
    config: &Config,
    routing_table: &RoutingTable,
    secrets: &secret::TokenPair,
    peer_store: &torrent::PeerStore,
    now: Instant,
    observed_addr: &[u8],
    msg_buffer: &mut msg_buffer::Buffer,
) -> Result<(), Error> {
    let query = GetPeersQueryArgs::try_from(args)?;
    let (want4, want6) = resolve_want(query.want(), addr);

    let mut resp = GetPeersRespVal::with_id(config.pivot_or_err(addr)?);
    resp.set_token(secrets.make_token(&addr, secret::sha256));

    let same_family_peers: Vec<Vec<u8>> = peer_store
        .peers_for(&query.info_hash())
        .iter()
        .filter(|p| matches!((p, addr), (SocketAddr::V4(_), SocketAddr::V4(_)) | (SocketAddr::V6(_), SocketAddr::V6(_))))
        .map(Addr::to_compact)
        .collect();

    if !same_family_peers.is_empty() {
        resp.set_values(same_family_peers);
    } else {
        if want4 {
            resp.set_nodes(routing_table.encode_neighbors_v4(query.info_hash(), now));
        }
        if want6 {
            resp.set_nodes6(routing_table.encode_neighbors_v6(query.info_hash(), now));
        }
    }

    msg_buffer.write_resp(
        tx_id_bytes,
        &resp,
        addr,
        Some(observed_addr),
        config.client_version.as_deref(),
    )
}

fn handle_announce_peer(
    args: &BTreeMap<ByteBuf, Value>,
    addr: SocketAddr,
    tx_id_bytes: &[u8],
    config: &Config,
    secrets: &secret::TokenPair,
    peer_store: &mut torrent::PeerStore,
    observed_addr: &[u8],
    msg_buffer: &mut msg_buffer::Buffer,
) -> Result<(), Error> {
    let query = AnnouncePeerQueryArgs::try_from(args)?;
    if !secrets.is_valid(&addr, query.token(), secret::sha256) {
        return Err(Error::ReceivedMalformedMessage(
            "announce_peer: invalid token".to_string(),
        ));
    }
    let port = query.resolved_port(addr.port());
    peer_store.add_peer(query.info_hash(), SocketAddr::new(addr.ip(), port));

    let resp = AnnouncePeerRespVal::with_id(config.pivot_or_err(addr)?);
    msg_buffer.write_resp(
        tx_id_bytes,
        &resp,
        addr,
        Some(observed_addr),
        config.client_version.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::krpc::RespVal;
    use crate::node::Id;
    use crate::SupportedAddr;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::time::Duration;

    fn config() -> Config {
        Config {
            ipv4_node_id: Some(Id::rand().unwrap()),
            ipv6_node_id: None,
            client_version: None,
            default_query_timeout: Duration::from_secs(30),
            is_read_only_node: false,
            max_node_count_per_bucket: 8,
            supported_addr: SupportedAddr::Ipv4,
        }
    }

    fn remote() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881))
    }

    fn routing_table(config: &Config) -> RoutingTable {
        RoutingTable::Ipv4(crate::routing::Table::new(
            config.ipv4_node_id.unwrap(),
            config.max_node_count_per_bucket,
            &[],
        ))
    }

    fn query_value(method: &str, args: Value) -> Value {
        let mut dict = BTreeMap::new();
        dict.insert(crate::krpc::key("a"), args);
        dict.insert(crate::krpc::key("q"), Value::ByteStr(ByteBuf::from(method.as_bytes().to_vec())));
        dict.insert(crate::krpc::key("t"), Value::ByteStr(ByteBuf::from(b"aa".to_vec())));
        dict.insert(crate::krpc::key("y"), Value::ByteStr(ByteBuf::from(b"q".to_vec())));
        Value::Dict(dict)
    }

    #[test]
    fn ping_replies_with_local_id() {
        let config = config();
        let table = routing_table(&config);
        let mut secrets = secret::TokenPair::new().unwrap();
        let mut peer_store = torrent::PeerStore::new();
        let mut msg_buffer = msg_buffer::Buffer::new();

        let args = PingQueryArgs::with_id(Id::rand().unwrap());
        let value = query_value(METHOD_PING, args.to_value());

        let handled = dispatch(
            &value,
            remote(),
            b"aa",
            &config,
            &table,
            &mut secrets,
            &mut peer_store,
            &mut msg_buffer,
        )
        .unwrap();
        assert!(handled);
        assert!(msg_buffer.pop_outbound().is_some());
    }

    #[test]
    fn announce_peer_rejects_bad_token() {
        let config = config();
        let mut secrets = secret::TokenPair::new().unwrap();
        let mut peer_store = torrent::PeerStore::new();
        let mut msg_buffer = msg_buffer::Buffer::new();
        let table = routing_table(&config);

        let args = AnnouncePeerQueryArgs::new(Id::rand().unwrap(), Id::rand().unwrap(), vec![9, 9, 9], Some(6881));
        let value = query_value(METHOD_ANNOUNCE_PEER, args.to_value());

        let handled = dispatch(
            &value,
            remote(),
            b"aa",
            &config,
            &table,
            &mut secrets,
            &mut peer_store,
            &mut msg_buffer,
        )
        .unwrap();
        assert!(!handled);
        assert!(peer_store.is_empty());
    }
}
