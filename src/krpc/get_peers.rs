// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `get_peers` method (spec §4.8/§4.9/§6): args carry `id`,
//! `info_hash`, optional `want`; response carries `id`, `token`, and
//! either `values` (compact peers) or `nodes`/`nodes6`.

use crate::{
    error::Error,
    krpc::{self, compact, key, QueryArgs, RespVal},
    node::Id,
};
use bt_bencode::Value;
use serde_bytes::ByteBuf;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::net::{SocketAddrV4, SocketAddrV6};

pub const METHOD_GET_PEERS: &str = "get_peers";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GetPeersQueryArgs {
    id: Id,
    info_hash: Id,
    want: Option<Vec<String>>,
}

impl GetPeersQueryArgs {
    #[must_use]
    pub fn with_id_and_info_hash(id: Id, info_hash: Id) -> Self {
        GetPeersQueryArgs {
            id,
            info_hash,
            want: None,
        }
    }

    #[must_use]
    pub fn info_hash(&self) -> Id {
        self.info_hash
    }

    #[must_use]
    pub fn want(&self) -> Option<&[String]> {
        self.want.as_deref()
    }

    pub fn set_want(&mut self, want: Vec<String>) {
        self.want = Some(want);
    }
}

impl QueryArgs for GetPeersQueryArgs {
    fn method_name() -> &'static [u8] {
        METHOD_GET_PEERS.as_bytes()
    }

    fn id(&self) -> Id {
        self.id
    }

    fn set_id(&mut self, id: Id) {
        self.id = id;
    }

    fn to_value(&self) -> Value {
        let mut dict = BTreeMap::new();
        dict.insert(key("id"), Value::ByteStr(self.id.to_bytebuf()));
        dict.insert(
            key("info_hash"),
            Value::ByteStr(self.info_hash.to_bytebuf()),
        );
        if let Some(want) = &self.want {
            dict.insert(
                key("want"),
                Value::List(
                    want.iter()
                        .map(|w| Value::ByteStr(ByteBuf::from(w.as_bytes().to_vec())))
                        .collect(),
                ),
            );
        }
        Value::Dict(dict)
    }
}

impl TryFrom<&BTreeMap<ByteBuf, Value>> for GetPeersQueryArgs {
    type Error = Error;

    fn try_from(args: &BTreeMap<ByteBuf, Value>) -> Result<Self, Self::Error> {
        let id = krpc::get_id(args).ok_or_else(|| {
            Error::ReceivedMalformedMessage("get_peers: missing id".to_string())
        })?;
        let info_hash = krpc::get_id_field(args, "info_hash").ok_or_else(|| {
            Error::ReceivedMalformedMessage("get_peers: missing info_hash".to_string())
        })?;
        Ok(GetPeersQueryArgs {
            id,
            info_hash,
            want: krpc::get_want(args),
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct GetPeersRespVal {
    id: Id,
    token: Option<Vec<u8>>,
    values: Option<Vec<Vec<u8>>>,
    nodes: Option<Vec<u8>>,
    nodes6: Option<Vec<u8>>,
}

impl GetPeersRespVal {
    #[must_use]
    pub fn with_id(id: Id) -> Self {
        GetPeersRespVal {
            id,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn id(&self) -> Id {
        self.id
    }

    #[must_use]
    pub fn token(&self) -> Option<&[u8]> {
        self.token.as_deref()
    }

    pub fn set_token(&mut self, token: Vec<u8>) {
        self.token = Some(token);
    }

    pub fn set_values(&mut self, values: Vec<Vec<u8>>) {
        self.values = Some(values);
    }

    pub fn set_nodes(&mut self, bytes: Vec<u8>) {
        self.nodes = Some(bytes);
    }

    pub fn set_nodes6(&mut self, bytes: Vec<u8>) {
        self.nodes6 = Some(bytes);
    }

    #[must_use]
    pub fn values_v4(&self) -> Vec<SocketAddrV4> {
        self.values
            .as_deref()
            .map(|vs| vs.iter().filter_map(|v| compact::decode_peer(v)).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn values_v6(&self) -> Vec<SocketAddrV6> {
        self.values
            .as_deref()
            .map(|vs| vs.iter().filter_map(|v| compact::decode_peer(v)).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn nodes(&self) -> Vec<crate::node::AddrId<SocketAddrV4>> {
        self.nodes
            .as_deref()
            .map(compact::decode_nodes)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn nodes6(&self) -> Vec<crate::node::AddrId<SocketAddrV6>> {
        self.nodes6
            .as_deref()
            .map(compact::decode_nodes)
            .unwrap_or_default()
    }
}

impl RespVal for GetPeersRespVal {
    fn to_value(&self) -> Value {
        let mut dict = BTreeMap::new();
        dict.insert(key("id"), Value::ByteStr(self.id.to_bytebuf()));
        if let Some(nodes) = &self.nodes {
            dict.insert(key("nodes"), Value::ByteStr(ByteBuf::from(nodes.clone())));
        }
        if let Some(nodes6) = &self.nodes6 {
            dict.insert(key("nodes6"), Value::ByteStr(ByteBuf::from(nodes6.clone())));
        }
        if let Some(token) = &self.token {
            dict.insert(key("token"), Value::ByteStr(ByteBuf::from(token.clone())));
        }
        if let Some(values) = &self.values {
            dict.insert(
                key("values"),
                Value::List(
                    values
                        .iter()
                        .map(|v| Value::ByteStr(ByteBuf::from(v.clone())))
                        .collect(),
                ),
            );
        }
        Value::Dict(dict)
    }
}

impl TryFrom<&BTreeMap<ByteBuf, Value>> for GetPeersRespVal {
    type Error = Error;

    fn try_from(args: &BTreeMap<ByteBuf, Value>) -> Result<Self, Self::Error> {
        let id = krpc::get_id(args).ok_or_else(|| {
            Error::ReceivedMalformedMessage("get_peers: missing id".to_string())
        })?;
        let values = args.get(&key("values")).and_then(Value::as_list).map(|l| {
            l.iter()
                .filter_map(Value::as_byte_str)
                .map(|b| b.to_vec())
                .collect()
        });
        Ok(GetPeersRespVal {
            id,
            token: krpc::get_bytes(args, "token").map(|b| b.to_vec()),
            values,
            nodes: krpc::get_bytes(args, "nodes").map(|b| b.to_vec()),
            nodes6: krpc::get_bytes(args, "nodes6").map(|b| b.to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn query_args_round_trip() {
        let id = Id::rand().unwrap();
        let info_hash = Id::rand().unwrap();
        let args = GetPeersQueryArgs::with_id_and_info_hash(id, info_hash);
        let dict = args.to_value();
        let parsed = GetPeersQueryArgs::try_from(dict.as_dict().unwrap()).unwrap();
        assert_eq!(parsed.info_hash(), info_hash);
    }

    #[test]
    fn resp_with_values_round_trips() {
        use crate::node::Addr;

        let id = Id::rand().unwrap();
        let peer = SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 6881);
        let mut resp = GetPeersRespVal::with_id(id);
        resp.set_token(vec![1, 2, 3, 4]);
        resp.set_values(vec![peer.to_compact()]);
        let value = resp.to_value();
        let parsed = GetPeersRespVal::try_from(value.as_dict().unwrap()).unwrap();
        assert_eq!(parsed.token(), Some(&[1, 2, 3, 4][..]));
        assert_eq!(parsed.values_v4(), vec![peer]);
    }
}
