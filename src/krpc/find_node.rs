// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `find_node` method (spec §4.8/§6): args carry `id`, `target`,
//! optional `want`; response carries `id` plus compact `nodes`/`nodes6`.

use crate::{
    error::Error,
    krpc::{self, compact, key, QueryArgs, RespVal},
    node::{AddrId, Id},
};
use bt_bencode::Value;
use serde_bytes::ByteBuf;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::net::{SocketAddrV4, SocketAddrV6};

pub const METHOD_FIND_NODE: &str = "find_node";

pub const WANT_N4: &str = "n4";
pub const WANT_N6: &str = "n6";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FindNodeQueryArgs {
    id: Id,
    target: Id,
    want: Option<Vec<String>>,
}

impl FindNodeQueryArgs {
    #[must_use]
    pub fn with_id_and_target(id: Id, target: Id) -> Self {
        FindNodeQueryArgs {
            id,
            target,
            want: None,
        }
    }

    #[must_use]
    pub fn target(&self) -> Id {
        self.target
    }

    #[must_use]
    pub fn want(&self) -> Option<&[String]> {
        self.want.as_deref()
    }

    pub fn set_want(&mut self, want: Vec<String>) {
        self.want = Some(want);
    }
}

impl QueryArgs for FindNodeQueryArgs {
    fn method_name() -> &'static [u8] {
        METHOD_FIND_NODE.as_bytes()
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
        dict.insert(key("target"), Value::ByteStr(self.target.to_bytebuf()));
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

impl TryFrom<&BTreeMap<ByteBuf, Value>> for FindNodeQueryArgs {
    type Error = Error;

    fn try_from(args: &BTreeMap<ByteBuf, Value>) -> Result<Self, Self::Error> {
        let id = krpc::get_id(args)
            .ok_or_else(|| Error::ReceivedMalformedMessage("find_node: missing id".to_string()))?;
        let target = krpc::get_id_field(args, "target").ok_or_else(|| {
            Error::ReceivedMalformedMessage("find_node: missing target".to_string())
        })?;
        Ok(FindNodeQueryArgs {
            id,
            target,
            want: krpc::get_want(args),
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct FindNodeRespVal {
    id: Id,
    nodes: Option<Vec<u8>>,
    nodes6: Option<Vec<u8>>,
}

impl FindNodeRespVal {
    #[must_use]
    pub fn with_id(id: Id) -> Self {
        FindNodeRespVal {
            id,
            nodes: None,
            nodes6: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn set_nodes(&mut self, bytes: Vec<u8>) {
        self.nodes = Some(bytes);
    }

    pub fn set_nodes6(&mut self, bytes: Vec<u8>) {
        self.nodes6 = Some(bytes);
    }

    #[must_use]
    pub fn nodes(&self) -> Vec<AddrId<SocketAddrV4>> {
        self.nodes
            .as_deref()
            .map(compact::decode_nodes)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn nodes6(&self) -> Vec<AddrId<SocketAddrV6>> {
        self.nodes6
            .as_deref()
            .map(compact::decode_nodes)
            .unwrap_or_default()
    }
}

impl RespVal for FindNodeRespVal {
    fn to_value(&self) -> Value {
        let mut dict = BTreeMap::new();
        dict.insert(key("id"), Value::ByteStr(self.id.to_bytebuf()));
        if let Some(nodes) = &self.nodes {
            dict.insert(key("nodes"), Value::ByteStr(ByteBuf::from(nodes.clone())));
        }
        if let Some(nodes6) = &self.nodes6 {
            dict.insert(key("nodes6"), Value::ByteStr(ByteBuf::from(nodes6.clone())));
        }
        Value::Dict(dict)
    }
}

impl TryFrom<&BTreeMap<ByteBuf, Value>> for FindNodeRespVal {
    type Error = Error;

    fn try_from(args: &BTreeMap<ByteBuf, Value>) -> Result<Self, Self::Error> {
        let id = krpc::get_id(args)
            .ok_or_else(|| Error::ReceivedMalformedMessage("find_node: missing id".to_string()))?;
        Ok(FindNodeRespVal {
            id,
            nodes: krpc::get_bytes(args, "nodes").map(|b| b.to_vec()),
            nodes6: krpc::get_bytes(args, "nodes6").map(|b| b.to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Id;
    use std::net::Ipv4Addr;

    #[test]
    fn query_args_round_trip_through_value() {
        let id = Id::rand().unwrap();
        let target = Id::rand().unwrap();
        let mut args = FindNodeQueryArgs::with_id_and_target(id, target);
        args.set_want(vec![WANT_N4.to_string()]);
        let dict = args.to_value();
        let dict = dict.as_dict().unwrap();
        let parsed = FindNodeQueryArgs::try_from(dict).unwrap();
        assert_eq!(parsed.target(), target);
        assert_eq!(parsed.want(), Some(&[WANT_N4.to_string()][..]));
    }

    #[test]
    fn resp_val_carries_compact_nodes() {
        let id = Id::rand().unwrap();
        let neighbor_id = Id::rand().unwrap();
        let neighbor_addr = SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 6881);
        let mut resp = FindNodeRespVal::with_id(id);
        resp.set_nodes(compact::encode_nodes(std::iter::once((
            neighbor_id,
            &neighbor_addr,
        ))));
        let value = resp.to_value();
        let parsed = FindNodeRespVal::try_from(value.as_dict().unwrap()).unwrap();
        let nodes = parsed.nodes();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id(), Some(neighbor_id));
        assert_eq!(nodes[0].addr(), neighbor_addr);
    }
}
