// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! KRPC messages are the protocol messages exchanged.

use crate::node::Id;
use bt_bencode::Value;
use serde_bytes::ByteBuf;
use std::collections::BTreeMap;
use std::convert::TryFrom;

pub mod announce_peer;
pub mod compact;
pub mod find_node;
pub mod get_peers;
pub mod ping;
pub(crate) mod ser;

/// Standard KRPC error codes (spec §6).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorCode {
    Generic,
    Server,
    Protocol,
    MethodUnknown,
}

impl ErrorCode {
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::Generic => 201,
            ErrorCode::Server => 202,
            ErrorCode::Protocol => 203,
            ErrorCode::MethodUnknown => 204,
        }
    }
}

/// Type of KRPC message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Kind<'a> {
    Query,
    Response,
    Error,
    Unknown(&'a str),
}

impl<'a> Kind<'a> {
    #[must_use]
    pub fn val(&self) -> &'a str {
        match self {
            Kind::Query => "q",
            Kind::Response => "r",
            Kind::Error => "e",
            Kind::Unknown(v) => v,
        }
    }
}

pub(crate) fn key(s: &str) -> ByteBuf {
    ByteBuf::from(s.as_bytes().to_vec())
}

/// A KRPC message.
pub trait Msg {
    /// The transaction id for the message.
    fn tx_id(&self) -> Option<&ByteBuf>;

    /// The type of message.
    fn kind(&self) -> Option<Kind<'_>>;

    /// The client version as a byte buffer.
    fn client_version(&self) -> Option<&ByteBuf>;

    /// The client version as a string.
    fn client_version_str(&self) -> Option<&str>;

    /// Whether the sender identifies as a BEP 43 read-only node.
    fn read_only(&self) -> bool;

    /// The BEP 42 observed address, if present (the `ip` field).
    fn observed_addr(&self) -> Option<&ByteBuf>;
}

impl Msg for Value {
    fn tx_id(&self) -> Option<&ByteBuf> {
        self.as_dict()
            .and_then(|dict| dict.get(&key("t")))
            .and_then(Value::as_byte_str)
    }

    fn kind(&self) -> Option<Kind<'_>> {
        self.as_dict()
            .and_then(|dict| dict.get(&key("y")))
            .and_then(Value::as_byte_str)
            .and_then(|y| match y.as_slice() {
                b"q" => Some(Kind::Query),
                b"r" => Some(Kind::Response),
                b"e" => Some(Kind::Error),
                _ => None,
            })
    }

    fn client_version(&self) -> Option<&ByteBuf> {
        self.as_dict()
            .and_then(|dict| dict.get(&key("v")))
            .and_then(Value::as_byte_str)
    }

    fn client_version_str(&self) -> Option<&str> {
        self.client_version()
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    fn read_only(&self) -> bool {
        self.as_dict()
            .and_then(|dict| dict.get(&key("ro")))
            .and_then(Value::as_int)
            .map(|ro| ro == 1)
            .unwrap_or(false)
    }

    fn observed_addr(&self) -> Option<&ByteBuf> {
        self.as_dict()
            .and_then(|dict| dict.get(&key("ip")))
            .and_then(Value::as_byte_str)
    }
}

/// A KRPC query message.
pub trait QueryMsg: Msg {
    /// The method name of the query.
    fn method_name(&self) -> Option<&ByteBuf>;

    /// The method name of the query as a string.
    fn method_name_str(&self) -> Option<&str>;

    /// The arguments for the query.
    fn args(&self) -> Option<&BTreeMap<ByteBuf, Value>>;

    /// The querying node ID.
    fn querying_node_id(&self) -> Option<Id>;
}

impl QueryMsg for Value {
    fn method_name(&self) -> Option<&ByteBuf> {
        self.as_dict()
            .and_then(|v| v.get(&key("q")))
            .and_then(Value::as_byte_str)
    }

    fn method_name_str(&self) -> Option<&str> {
        self.method_name().and_then(|v| std::str::from_utf8(v).ok())
    }

    fn args(&self) -> Option<&BTreeMap<ByteBuf, Value>> {
        self.as_dict()
            .and_then(|dict| dict.get(&key("a")))
            .and_then(Value::as_dict)
    }

    fn querying_node_id(&self) -> Option<Id> {
        self.args()
            .and_then(|a| a.get(&key("id")))
            .and_then(Value::as_byte_str)
            .and_then(|id| Id::try_from(id.as_slice()).ok())
    }
}

/// A KRPC response message.
pub trait RespMsg: Msg {
    /// The response values.
    fn values(&self) -> Option<&BTreeMap<ByteBuf, Value>>;

    /// The queried node id.
    fn queried_node_id(&self) -> Option<Id>;
}

impl RespMsg for Value {
    fn values(&self) -> Option<&BTreeMap<ByteBuf, Value>> {
        self.as_dict()
            .and_then(|dict| dict.get(&key("r")))
            .and_then(Value::as_dict)
    }

    fn queried_node_id(&self) -> Option<Id> {
        self.values()
            .and_then(|a| a.get(&key("id")))
            .and_then(Value::as_byte_str)
            .and_then(|id| Id::try_from(id.as_slice()).ok())
    }
}

/// A KRPC error message.
pub trait ErrMsg: Msg {
    /// The `[code, message]` pair carried by an error response.
    fn error(&self) -> Option<(i32, String)>;
}

impl ErrMsg for Value {
    fn error(&self) -> Option<(i32, String)> {
        let list = self
            .as_dict()
            .and_then(|dict| dict.get(&key("e")))
            .and_then(Value::as_list)?;
        let code = list.first().and_then(Value::as_int)?;
        let msg = list
            .get(1)
            .and_then(Value::as_byte_str)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        Some((i32::try_from(code).unwrap_or(i32::MAX), msg))
    }
}

/// KRPC query arguments, written by the local node.
pub trait QueryArgs {
    /// The query method name.
    fn method_name() -> &'static [u8];

    /// The querying node ID.
    fn id(&self) -> Id;

    /// Sets the querying node ID in the arguments.
    fn set_id(&mut self, id: Id);

    /// Represents the arguments as a Bencoded Value.
    fn to_value(&self) -> Value;
}

/// A KRPC response value, written by the local node.
pub trait RespVal {
    /// Represents the response as a Bencoded Value.
    fn to_value(&self) -> Value;
}

/// A KRPC error detail, written by the local node.
pub trait ErrorVal {
    /// Represents the error as a Bencoded Value (a 2-element list).
    fn to_value(&self) -> Value;
}

/// The default error detail: a standard code plus a human-readable string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StdError {
    pub code: i32,
    pub description: String,
}

impl StdError {
    #[must_use]
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        StdError {
            code: code.code(),
            description: description.into(),
        }
    }
}

impl ErrorVal for StdError {
    fn to_value(&self) -> Value {
        Value::List(vec![
            Value::Int(i64::from(self.code)),
            Value::ByteStr(ByteBuf::from(self.description.as_bytes().to_vec())),
        ])
    }
}

pub(crate) fn get_id(args: &BTreeMap<ByteBuf, Value>) -> Option<Id> {
    args.get(&key("id"))
        .and_then(Value::as_byte_str)
        .and_then(|id| Id::try_from(id.as_slice()).ok())
}

pub(crate) fn get_bytes<'a>(
    args: &'a BTreeMap<ByteBuf, Value>,
    name: &str,
) -> Option<&'a ByteBuf> {
    args.get(&key(name)).and_then(Value::as_byte_str)
}

pub(crate) fn get_int(args: &BTreeMap<ByteBuf, Value>, name: &str) -> Option<i64> {
    args.get(&key(name)).and_then(Value::as_int)
}

pub(crate) fn get_id_field(args: &BTreeMap<ByteBuf, Value>, name: &str) -> Option<Id> {
    get_bytes(args, name).and_then(|b| Id::try_from(b.as_slice()).ok())
}

pub(crate) fn get_want(args: &BTreeMap<ByteBuf, Value>) -> Option<Vec<String>> {
    args.get(&key("want")).and_then(Value::as_list).map(|list| {
        list.iter()
            .filter_map(Value::as_byte_str)
            .filter_map(|b| std::str::from_utf8(b).ok())
            .map(str::to_owned)
            .collect()
    })
}
