// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! 160-bit identifiers used both as node ids and info hashes.

use crate::error::Error;
use rand::RngCore;
use serde_bytes::ByteBuf;
use std::{
    convert::TryFrom,
    fmt,
    ops::RangeInclusive,
};

/// Number of bytes in an [`Id`].
pub const ID_LEN: usize = 20;

/// A 160-bit big-endian unsigned identifier.
///
/// Used both as a node id and as an info hash ([`crate::torrent::InfoHash`]
/// is a type alias for this type, since both are opaque 160-bit values with
/// identical operations).
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Id([u8; ID_LEN]);

impl Id {
    /// The smallest possible id, `0`.
    #[must_use]
    pub const fn min() -> Self {
        Id([0; ID_LEN])
    }

    /// The largest possible id, `2^160 - 1`.
    #[must_use]
    pub const fn max() -> Self {
        Id([0xff; ID_LEN])
    }

    /// Generates a random id using the thread-local CSPRNG.
    pub fn rand() -> Result<Self, Error> {
        let mut bytes = [0u8; ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Ok(Id(bytes))
    }

    /// Generates a random id within the inclusive range `[range.start(),
    /// range.end()]` via rejection sampling.
    pub fn rand_in_inclusive_range(range: &RangeInclusive<Id>) -> Result<Self, Error> {
        let (lo, hi) = (*range.start(), *range.end());
        if lo > hi {
            return Err(Error::InvalidRange);
        }
        if lo == hi {
            return Ok(lo);
        }
        let mut rng = rand::thread_rng();
        loop {
            let mut bytes = [0u8; ID_LEN];
            rng.fill_bytes(&mut bytes);
            let candidate = Id(bytes);
            if candidate >= lo && candidate <= hi {
                return Ok(candidate);
            }
        }
    }

    /// Returns the XOR distance between two ids, interpreted as an
    /// unsigned 160-bit magnitude (so [`Ord`] on the result ranks
    /// closeness correctly).
    #[must_use]
    pub fn distance(&self, other: &Id) -> Id {
        let mut out = [0u8; ID_LEN];
        for i in 0..ID_LEN {
            out[i] = self.0[i] ^ other.0[i];
        }
        Id(out)
    }

    /// Returns the midpoint between two ids: `lo + (hi - lo) / 2`.
    ///
    /// Order of the two arguments does not matter.
    #[must_use]
    pub fn middle(&self, other: &Id) -> Id {
        let (lo, hi) = if self <= other {
            (self, other)
        } else {
            (other, self)
        };
        let diff = sub(&hi.0, &lo.0);
        let half = shr1(&diff);
        Id(add(&lo.0, &half))
    }

    /// Returns `self - 1`. Defined only for `self > Id::min()`.
    #[must_use]
    pub fn prev(&self) -> Self {
        let mut one = [0u8; ID_LEN];
        one[ID_LEN - 1] = 1;
        Id(sub(&self.0, &one))
    }

    /// Returns `self + 1`, saturating at [`Id::max`].
    #[must_use]
    pub fn next(&self) -> Self {
        if *self == Id::max() {
            return *self;
        }
        let mut one = [0u8; ID_LEN];
        one[ID_LEN - 1] = 1;
        Id(add(&self.0, &one))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    #[must_use]
    pub fn to_bytebuf(self) -> ByteBuf {
        ByteBuf::from(self.0.to_vec())
    }
}

fn sub(a: &[u8; ID_LEN], b: &[u8; ID_LEN]) -> [u8; ID_LEN] {
    let mut out = [0u8; ID_LEN];
    let mut borrow: i16 = 0;
    for i in (0..ID_LEN).rev() {
        let mut diff = i16::from(a[i]) - i16::from(b[i]) - borrow;
        if diff < 0 {
            diff += 256;
            borrow = 1;
        } else {
            borrow = 0;
        }
        out[i] = diff as u8;
    }
    out
}

fn add(a: &[u8; ID_LEN], b: &[u8; ID_LEN]) -> [u8; ID_LEN] {
    let mut out = [0u8; ID_LEN];
    let mut carry: u16 = 0;
    for i in (0..ID_LEN).rev() {
        let sum = u16::from(a[i]) + u16::from(b[i]) + carry;
        out[i] = sum as u8;
        carry = sum >> 8;
    }
    out
}

fn shr1(a: &[u8; ID_LEN]) -> [u8; ID_LEN] {
    let mut out = [0u8; ID_LEN];
    let mut carry = 0u8;
    for i in 0..ID_LEN {
        out[i] = (a[i] >> 1) | (carry << 7);
        carry = a[i] & 1;
    }
    out
}

impl AsRef<[u8]> for Id {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Id {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != ID_LEN {
            return Err(Error::InvalidNodeId);
        }
        let mut out = [0u8; ID_LEN];
        out.copy_from_slice(bytes);
        Ok(Id(out))
    }
}

impl TryFrom<&ByteBuf> for Id {
    type Error = Error;

    fn try_from(bytes: &ByteBuf) -> Result<Self, Self::Error> {
        Id::try_from(bytes.as_slice())
    }
}

impl From<[u8; ID_LEN]> for Id {
    fn from(bytes: [u8; ID_LEN]) -> Self {
        Id(bytes)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id(")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Parses the hex encoding produced by [`fmt::Display`], e.g. for a node
/// id passed on the command line.
impl std::str::FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ID_LEN * 2 {
            return Err(Error::InvalidNodeId);
        }
        let mut out = [0u8; ID_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| Error::InvalidNodeId)?;
        }
        Ok(Id(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_max_ordering() {
        assert!(Id::min() < Id::max());
    }

    #[test]
    fn distance_is_symmetric_and_zero_for_self() {
        let a = Id::rand().unwrap();
        let b = Id::rand().unwrap();
        assert_eq!(a.distance(&a), Id::min());
        assert_eq!(a.distance(&b), b.distance(&a));
    }

    #[test]
    fn middle_is_between_bounds() {
        let lo = Id::min();
        let hi = Id::max();
        let mid = hi.middle(&lo);
        assert!(mid >= lo);
        assert!(mid <= hi);
        // Half of all-ones is 0x7f repeated, remainder dropped.
        assert_eq!(mid.as_bytes()[0], 0x7f);
    }

    #[test]
    fn middle_is_order_independent() {
        let a = Id::rand().unwrap();
        let b = Id::rand().unwrap();
        assert_eq!(a.middle(&b), b.middle(&a));
    }

    #[test]
    fn next_and_prev_roundtrip() {
        let id = Id::rand_in_inclusive_range(&(Id::min().next()..=Id::max().prev())).unwrap();
        assert_eq!(id.next().prev(), id);
    }

    #[test]
    fn try_from_rejects_wrong_length() {
        assert!(Id::try_from(&b"short"[..]).is_err());
        assert!(Id::try_from(&[0u8; ID_LEN][..]).is_ok());
    }

    #[test]
    fn from_str_roundtrips_through_display() {
        let id = Id::rand().unwrap();
        let parsed: Id = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn from_str_rejects_wrong_length_and_non_hex() {
        use std::str::FromStr;
        assert!(Id::from_str("abcd").is_err());
        assert!(Id::from_str(&"zz".repeat(ID_LEN)).is_err());
    }

    #[test]
    fn rand_in_inclusive_range_stays_within_bounds() {
        let mut bytes_lo = [0u8; ID_LEN];
        bytes_lo[0] = 0x10;
        let mut bytes_hi = [0u8; ID_LEN];
        bytes_hi[0] = 0x20;
        let lo = Id::from(bytes_lo);
        let hi = Id::from(bytes_hi);
        for _ in 0..50 {
            let v = Id::rand_in_inclusive_range(&(lo..=hi)).unwrap();
            assert!(v >= lo && v <= hi);
        }
    }
}
