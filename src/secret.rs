// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `get_peers`/`announce_peer` token rotation (spec §3/§4.10).
//!
//! SHA-256 is an external collaborator (spec §1 "pluggable hash
//! primitive"); callers supply it as `Fn(&[u8]) -> [u8; 32]`. [`sha256`]
//! is the default, `sha2`-crate-backed implementation.

use crate::node::{Addr, Id};
use sha2::{Digest, Sha256};

/// The default hash primitive: SHA-256 via the `sha2` crate.
#[must_use]
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// The current/previous secret pair used to mint and validate tokens.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TokenPair {
    current: Id,
    previous: Id,
}

impl TokenPair {
    /// Initializes both `current` and `previous` to the same fresh
    /// random value (spec §3 "At initialization, current = previous =
    /// random").
    pub fn new() -> Result<Self, crate::error::Error> {
        let value = Id::rand()?;
        Ok(TokenPair {
            current: value,
            previous: value,
        })
    }

    /// Shifts `current` into `previous` and draws a new `current`.
    pub fn rotate(&mut self) -> Result<(), crate::error::Error> {
        self.previous = self.current;
        self.current = Id::rand()?;
        Ok(())
    }

    /// Computes the token a node at `addr` should present, using the
    /// current secret.
    #[must_use]
    pub fn make_token<A: Addr>(&self, addr: &A, hash_fn: impl Fn(&[u8]) -> [u8; 32]) -> Vec<u8> {
        token_for(addr, &self.current, hash_fn)
    }

    /// Checks whether `token` is valid for `addr` against either the
    /// current or previous secret.
    #[must_use]
    pub fn is_valid<A: Addr>(
        &self,
        addr: &A,
        token: &[u8],
        hash_fn: impl Fn(&[u8]) -> [u8; 32],
    ) -> bool {
        token_for(addr, &self.current, &hash_fn) == token
            || token_for(addr, &self.previous, &hash_fn) == token
    }
}

fn token_for<A: Addr>(addr: &A, secret: &Id, hash_fn: impl Fn(&[u8]) -> [u8; 32]) -> Vec<u8> {
    let mut input = addr.to_compact();
    input.extend_from_slice(secret.as_bytes());
    hash_fn(&input).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn addr() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881)
    }

    #[test]
    fn token_validates_against_current_secret() {
        let pair = TokenPair::new().unwrap();
        let token = pair.make_token(&addr(), sha256);
        assert!(pair.is_valid(&addr(), &token, sha256));
    }

    #[test]
    fn token_still_valid_against_previous_secret_after_one_rotation() {
        let mut pair = TokenPair::new().unwrap();
        let token = pair.make_token(&addr(), sha256);
        pair.rotate().unwrap();
        assert!(pair.is_valid(&addr(), &token, sha256));
    }

    #[test]
    fn token_invalid_after_two_rotations() {
        let mut pair = TokenPair::new().unwrap();
        let token = pair.make_token(&addr(), sha256);
        pair.rotate().unwrap();
        pair.rotate().unwrap();
        assert!(!pair.is_valid(&addr(), &token, sha256));
    }

    #[test]
    fn token_invalid_for_a_different_address() {
        let pair = TokenPair::new().unwrap();
        let token = pair.make_token(&addr(), sha256);
        let other = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6882);
        assert!(!pair.is_valid(&other, &token, sha256));
    }
}
