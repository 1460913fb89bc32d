// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Outbound wire structs. Read access to inbound messages goes through
//! the flexible [`super::Msg`]/[`super::QueryMsg`]/[`super::RespMsg`]
//! traits over `bt_bencode::Value`; these structs are the exact shape
//! serialized for a message this node sends, field order matching
//! canonical (lexicographically-sorted-key) bencode.

use bt_bencode::Value;
use serde_bytes::Bytes;
use serde_derive::Serialize;

#[derive(Serialize)]
pub(crate) struct QueryMsg<'a> {
    #[serde(rename = "a", skip_serializing_if = "Option::is_none")]
    pub a: Option<&'a Value>,
    #[serde(rename = "q")]
    pub q: &'a Bytes,
    #[serde(rename = "ro", skip_serializing_if = "Option::is_none")]
    pub ro: Option<i64>,
    #[serde(rename = "t")]
    pub t: &'a Bytes,
    #[serde(rename = "v", skip_serializing_if = "Option::is_none")]
    pub v: Option<&'a Bytes>,
    #[serde(rename = "y")]
    pub y: &'a Bytes,
}

#[derive(Serialize)]
pub(crate) struct RespMsg<'a> {
    #[serde(rename = "ip", skip_serializing_if = "Option::is_none")]
    pub ip: Option<&'a Bytes>,
    #[serde(rename = "r", skip_serializing_if = "Option::is_none")]
    pub r: Option<&'a Value>,
    #[serde(rename = "t")]
    pub t: &'a Bytes,
    #[serde(rename = "v", skip_serializing_if = "Option::is_none")]
    pub v: Option<&'a Bytes>,
    #[serde(rename = "y")]
    pub y: &'a Bytes,
}

#[derive(Serialize)]
pub(crate) struct ErrMsg<'a> {
    #[serde(rename = "e", skip_serializing_if = "Option::is_none")]
    pub e: Option<&'a Value>,
    #[serde(rename = "ip", skip_serializing_if = "Option::is_none")]
    pub ip: Option<&'a Bytes>,
    #[serde(rename = "t")]
    pub t: &'a Bytes,
    #[serde(rename = "v", skip_serializing_if = "Option::is_none")]
    pub v: Option<&'a Bytes>,
    #[serde(rename = "y")]
    pub y: &'a Bytes,
}
