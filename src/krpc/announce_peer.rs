// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `announce_peer` method (spec §4.9/§6): args carry `id`,
//! `info_hash`, `token`, and either an explicit `port` or
//! `implied_port = 1` (use the UDP source port observed by the
//! receiver).

use crate::{
    error::Error,
    krpc::{self, key, QueryArgs},
    node::Id,
};
use bt_bencode::Value;
use serde_bytes::ByteBuf;
use std::collections::BTreeMap;
use std::convert::TryFrom;

pub const METHOD_ANNOUNCE_PEER: &str = "announce_peer";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AnnouncePeerQueryArgs {
    id: Id,
    info_hash: Id,
    token: Vec<u8>,
    port: Option<u16>,
    implied_port: bool,
}

impl AnnouncePeerQueryArgs {
    /// `torrent_port = None` produces `implied_port=1, port=0` (spec
    /// §4.9 AnnouncePeer args rule); `Some(port)` produces an explicit
    /// `port` with no `implied_port`.
    #[must_use]
    pub fn new(id: Id, info_hash: Id, token: Vec<u8>, torrent_port: Option<u16>) -> Self {
        match torrent_port {
            Some(port) => AnnouncePeerQueryArgs {
                id,
                info_hash,
                token,
                port: Some(port),
                implied_port: false,
            },
            None => AnnouncePeerQueryArgs {
                id,
                info_hash,
                token,
                port: Some(0),
                implied_port: true,
            },
        }
    }

    #[must_use]
    pub fn info_hash(&self) -> Id {
        self.info_hash
    }

    #[must_use]
    pub fn token(&self) -> &[u8] {
        &self.token
    }

    /// Resolves the port to store the peer under: the explicit `port`
    /// unless `implied_port=1`, in which case the caller's observed UDP
    /// source port wins.
    #[must_use]
    pub fn resolved_port(&self, observed_port: u16) -> u16 {
        if self.implied_port {
            observed_port
        } else {
            self.port.unwrap_or(0)
        }
    }
}

impl QueryArgs for AnnouncePeerQueryArgs {
    fn method_name() -> &'static [u8] {
        METHOD_ANNOUNCE_PEER.as_bytes()
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
        if self.implied_port {
            dict.insert(key("implied_port"), Value::Int(1));
        }
        dict.insert(
            key("port"),
            Value::Int(i64::from(self.port.unwrap_or(0))),
        );
        dict.insert(key("token"), Value::ByteStr(ByteBuf::from(self.token.clone())));
        Value::Dict(dict)
    }
}

impl TryFrom<&BTreeMap<ByteBuf, Value>> for AnnouncePeerQueryArgs {
    type Error = Error;

    fn try_from(args: &BTreeMap<ByteBuf, Value>) -> Result<Self, Self::Error> {
        let id = krpc::get_id(args).ok_or_else(|| {
            Error::ReceivedMalformedMessage("announce_peer: missing id".to_string())
        })?;
        let info_hash = krpc::get_id_field(args, "info_hash").ok_or_else(|| {
            Error::ReceivedMalformedMessage("announce_peer: missing info_hash".to_string())
        })?;
        let token = krpc::get_bytes(args, "token")
            .map(|b| b.to_vec())
            .ok_or_else(|| {
                Error::ReceivedMalformedMessage("announce_peer: missing token".to_string())
            })?;
        let implied_port = krpc::get_int(args, "implied_port") == Some(1);
        let port = krpc::get_int(args, "port").map(|p| p as u16);
        Ok(AnnouncePeerQueryArgs {
            id,
            info_hash,
            token,
            port,
            implied_port,
        })
    }
}

/// The response to an `announce_peer` query: just the responder's `id`,
/// identical in shape to [`super::ping::PingRespVal`] but kept distinct
/// since the two methods are not interchangeable on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AnnouncePeerRespVal {
    id: Id,
}

impl AnnouncePeerRespVal {
    #[must_use]
    pub fn with_id(id: Id) -> Self {
        AnnouncePeerRespVal { id }
    }

    #[must_use]
    pub fn id(&self) -> Id {
        self.id
    }
}

impl crate::krpc::RespVal for AnnouncePeerRespVal {
    fn to_value(&self) -> Value {
        let mut dict = BTreeMap::new();
        dict.insert(key("id"), Value::ByteStr(self.id.to_bytebuf()));
        Value::Dict(dict)
    }
}

impl TryFrom<&BTreeMap<ByteBuf, Value>> for AnnouncePeerRespVal {
    type Error = Error;

    fn try_from(args: &BTreeMap<ByteBuf, Value>) -> Result<Self, Self::Error> {
        let id = krpc::get_id(args).ok_or_else(|| {
            Error::ReceivedMalformedMessage("announce_peer: missing id".to_string())
        })?;
        Ok(AnnouncePeerRespVal { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_port_round_trips() {
        let args =
            AnnouncePeerQueryArgs::new(Id::rand().unwrap(), Id::rand().unwrap(), vec![9], Some(6881));
        let dict = args.to_value();
        let parsed = AnnouncePeerQueryArgs::try_from(dict.as_dict().unwrap()).unwrap();
        assert_eq!(parsed.resolved_port(1234), 6881);
    }

    #[test]
    fn implied_port_uses_observed_source_port() {
        let args = AnnouncePeerQueryArgs::new(Id::rand().unwrap(), Id::rand().unwrap(), vec![9], None);
        let dict = args.to_value();
        let parsed = AnnouncePeerQueryArgs::try_from(dict.as_dict().unwrap()).unwrap();
        assert_eq!(parsed.resolved_port(1234), 1234);
    }
}
