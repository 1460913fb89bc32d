// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! BEP 42 ("DHT Security extension") node id validation.
//!
//! Constrains a node's claimed id to a masked CRC32C of its source address,
//! so a single IP cannot trivially mint many distinct ids near a target.

use crate::node::Id;
use rand::RngCore;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const IPV6_MASK: [u8; 8] = [0x01, 0x03, 0x07, 0x0F, 0x1F, 0x3F, 0x7F, 0xFF];

fn crc32c(bytes: &[u8]) -> u32 {
    crc32c::crc32c(bytes)
}

fn low3(id: &Id) -> u8 {
    id.as_bytes()[19] & 0x07
}

fn is_ipv4_exempt(ip: Ipv4Addr) -> bool {
    let o = ip.octets();
    ip.is_loopback() // 127.0.0.0/8
        || (o[0] == 169 && o[1] == 254) // 169.254.0.0/16
        || o[0] == 10 // 10.0.0.0/8
        || (o[0] == 172 && (16..=31).contains(&o[1])) // 172.16.0.0/12
        || (o[0] == 192 && o[1] == 168) // 192.168.0.0/16
}

fn ipv4_crc_input(ip: Ipv4Addr, r: u8) -> [u8; 4] {
    let o = ip.octets();
    [
        (o[0] & 0x03) | (r << 5),
        o[1] & 0x0F,
        o[2] & 0x3F,
        o[3],
    ]
}

fn ipv6_crc_input(ip: Ipv6Addr, r: u8) -> [u8; 8] {
    let o = ip.octets();
    let mut masked = [0u8; 8];
    for i in 0..8 {
        masked[i] = o[i] & IPV6_MASK[i];
    }
    masked[0] |= r << 5;
    masked
}

fn matches_crc(id: &Id, crc: u32) -> bool {
    let bytes = id.as_bytes();
    bytes[0] == ((crc >> 24) & 0xFF) as u8
        && bytes[1] == ((crc >> 16) & 0xFF) as u8
        && (bytes[2] & 0xF8) == ((crc >> 8) & 0xF8) as u8
}

/// Checks whether `id` is a valid node id for a node claiming address `ip`.
///
/// IPv4 addresses in loopback, link-local, or private ranges are accepted
/// unconditionally; `IpAddr::V6` has no such exception (spec Open Question,
/// preserved as-is).
#[must_use]
pub fn is_valid(ip: IpAddr, id: &Id) -> bool {
    let r = low3(id);
    match ip {
        IpAddr::V4(v4) => {
            if is_ipv4_exempt(v4) {
                return true;
            }
            let crc = crc32c(&ipv4_crc_input(v4, r));
            matches_crc(id, crc)
        }
        IpAddr::V6(v6) => {
            let crc = crc32c(&ipv6_crc_input(v6, r));
            matches_crc(id, crc)
        }
    }
}

/// Generates a node id that is valid for `ip` per [`is_valid`].
#[must_use]
pub fn make_node_id(ip: IpAddr) -> Id {
    let mut rng = rand::thread_rng();
    let r = (rng.next_u32() & 0x07) as u8;
    let crc = match ip {
        IpAddr::V4(v4) => crc32c(&ipv4_crc_input(v4, r)),
        IpAddr::V6(v6) => crc32c(&ipv6_crc_input(v6, r)),
    };
    let mut bytes = [0u8; crate::node::ID_LEN];
    rng.fill_bytes(&mut bytes);
    bytes[0] = ((crc >> 24) & 0xFF) as u8;
    bytes[1] = ((crc >> 16) & 0xFF) as u8;
    bytes[2] = (((crc >> 8) & 0xF8) as u8) | (bytes[2] & 0x07);
    bytes[19] = r;
    Id::from(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_validate_for_public_ipv4() {
        let ip = IpAddr::V4(Ipv4Addr::new(88, 1, 2, 3));
        for _ in 0..20 {
            let id = make_node_id(ip);
            assert!(is_valid(ip, &id));
        }
    }

    #[test]
    fn flipping_a_constrained_byte_invalidates() {
        let ip = IpAddr::V4(Ipv4Addr::new(88, 1, 2, 3));
        let id = make_node_id(ip);
        let mut bytes = *id.as_bytes();
        bytes[0] ^= 0xFF;
        let tampered = Id::from(bytes);
        assert!(!is_valid(ip, &tampered));
    }

    #[test]
    fn flipping_the_constrained_top_bits_of_byte_two_invalidates() {
        let ip = IpAddr::V4(Ipv4Addr::new(88, 1, 2, 3));
        let id = make_node_id(ip);
        let mut bytes = *id.as_bytes();
        bytes[2] ^= 0x08; // top bit within the 0xF8 mask
        let tampered = Id::from(bytes);
        assert!(!is_valid(ip, &tampered));
    }

    #[test]
    fn flipping_the_free_low_bits_of_byte_two_still_validates() {
        let ip = IpAddr::V4(Ipv4Addr::new(88, 1, 2, 3));
        let id = make_node_id(ip);
        let mut bytes = *id.as_bytes();
        bytes[2] ^= 0x01; // outside the 0xF8 mask
        let tampered = Id::from(bytes);
        assert!(is_valid(ip, &tampered));
    }

    #[test]
    fn private_and_loopback_ipv4_always_valid() {
        let id = Id::rand().unwrap();
        for ip in [
            Ipv4Addr::new(127, 0, 0, 1),
            Ipv4Addr::new(169, 254, 1, 1),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(172, 16, 0, 1),
            Ipv4Addr::new(192, 168, 1, 1),
        ] {
            assert!(is_valid(IpAddr::V4(ip), &id));
        }
    }

    #[test]
    fn ipv6_has_no_private_range_exception() {
        let id = Id::rand().unwrap();
        // A link-local IPv6 address with a random, unrelated id should not
        // validate (unlike the IPv4 exception list).
        let ip = IpAddr::V6("fe80::1".parse().unwrap());
        assert!(!is_valid(ip, &id));
    }

    #[test]
    fn generated_ids_validate_for_ipv6() {
        let ip = IpAddr::V6("2001:db8::1".parse().unwrap());
        let id = make_node_id(ip);
        assert!(is_valid(ip, &id));
    }
}
