// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error kinds surfaced by the DHT core.

use thiserror::Error;

/// Errors produced by the DHT core.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// No channel is bound, so a message could not be sent.
    #[error("channel not available")]
    ChannelNotAvailable,

    /// A response arrived whose transaction id was recognized, but the
    /// source address did not match the address the query was sent to.
    #[error("received response from unknown address")]
    ReceivedResponseFromUnknownAddress,

    /// A response arrived whose `r.id` did not match the node id
    /// previously recorded for that remote.
    #[error("received response with unexpected node id")]
    ReceivedResponseWithUnexpectedNodeId,

    /// An incoming query was structurally invalid (e.g. missing `id` or a
    /// required argument).
    #[error("received malformed message: {0}")]
    ReceivedMalformedMessage(String),

    /// The remote returned a KRPC error.
    #[error("error response: {code} {description}")]
    ErrorResponse { code: i32, description: String },

    /// The query's deadline elapsed without a response.
    #[error("transaction timed out")]
    Timeout,

    /// The caller cancelled the operation or the whole node.
    #[error("cancelled")]
    Cancelled,

    /// The wire bytes could not be parsed as a KRPC message.
    #[error("cannot deserialize krpc message")]
    CannotDeserializeKrpcMessage,

    /// The message could not be serialized to wire bytes.
    #[error("cannot serialize krpc message")]
    CannotSerializeKrpcMessage,

    /// A two-byte transaction id was malformed.
    #[error("invalid local transaction id")]
    InvalidLocalTransactionId,

    /// A 20-byte node id was malformed.
    #[error("invalid node id")]
    InvalidNodeId,

    /// A compact network address was malformed.
    #[error("invalid network address")]
    InvalidNetworkAddress,

    /// An inclusive range had `start() > end()`.
    #[error("invalid range")]
    InvalidRange,
}
