// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `ping` method (spec §6): args carry only `id`; the response
//! echoes the responder's own `id`.

use crate::{
    error::Error,
    krpc::{self, key, QueryArgs, RespVal},
    node::Id,
};
use bt_bencode::Value;
use serde_bytes::ByteBuf;
use std::collections::BTreeMap;
use std::convert::TryFrom;

pub const METHOD_PING: &str = "ping";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PingQueryArgs {
    id: Id,
}

impl PingQueryArgs {
    #[must_use]
    pub fn with_id(id: Id) -> Self {
        PingQueryArgs { id }
    }
}

impl QueryArgs for PingQueryArgs {
    fn method_name() -> &'static [u8] {
        METHOD_PING.as_bytes()
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
        Value::Dict(dict)
    }
}

impl TryFrom<&BTreeMap<ByteBuf, Value>> for PingQueryArgs {
    type Error = Error;

    fn try_from(args: &BTreeMap<ByteBuf, Value>) -> Result<Self, Self::Error> {
        let id = krpc::get_id(args).ok_or_else(|| {
            Error::ReceivedMalformedMessage("ping: missing id".to_string())
        })?;
        Ok(PingQueryArgs { id })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PingRespVal {
    id: Id,
}

impl PingRespVal {
    #[must_use]
    pub fn with_id(id: Id) -> Self {
        PingRespVal { id }
    }

    #[must_use]
    pub fn id(&self) -> Id {
        self.id
    }
}

impl RespVal for PingRespVal {
    fn to_value(&self) -> Value {
        let mut dict = BTreeMap::new();
        dict.insert(key("id"), Value::ByteStr(self.id.to_bytebuf()));
        Value::Dict(dict)
    }
}

impl TryFrom<&BTreeMap<ByteBuf, Value>> for PingRespVal {
    type Error = Error;

    fn try_from(args: &BTreeMap<ByteBuf, Value>) -> Result<Self, Self::Error> {
        let id = krpc::get_id(args).ok_or_else(|| {
            Error::ReceivedMalformedMessage("ping: missing id".to_string())
        })?;
        Ok(PingRespVal { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_args_round_trip_through_value() {
        let id = Id::rand().unwrap();
        let args = PingQueryArgs::with_id(id);
        let value = args.to_value();
        let dict = value.as_dict().unwrap();
        let parsed = PingQueryArgs::try_from(dict).unwrap();
        assert_eq!(parsed.id(), id);
    }
}
