// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Ordering of a server's addresses by subnet affinity.

use crate::netif::Interface;
use std::net::Ipv4Addr;

/// Netmask implied by a broadcast address (its trailing one bits are the
/// host part).
pub fn mask_from_broadcast(broadcast: Ipv4Addr) -> u32 {
    let host_bits = u32::from(broadcast).trailing_ones();
    if host_bits >= 32 {
        0
    } else {
        u32::MAX << host_bits
    }
}

fn same_subnet(a: Ipv4Addr, b: Ipv4Addr, mask: u32) -> bool {
    u32::from(a) & mask == u32::from(b) & mask
}

/// Order the server's `(ip, broadcast)` pairs for connection attempts.
///
/// Addresses in the `preferred` subnet come first, then addresses sharing
/// a subnet with one of the `local` interfaces, then the rest. Relative
/// order is kept within each group; unparsable entries are dropped.
pub fn order_addresses(
    pairs: &[(String, String)],
    preferred: Option<Ipv4Addr>,
    local: &[Interface],
) -> Vec<Ipv4Addr> {
    let mut ranked: Vec<(u8, Ipv4Addr)> = pairs
        .iter()
        .filter_map(|(ip, broadcast)| {
            let Ok(ip) = ip.parse::<Ipv4Addr>() else {
                log::debug!("[failover] skipping unparsable address {:?}", ip);
                return None;
            };
            let mask = broadcast
                .parse::<Ipv4Addr>()
                .map(mask_from_broadcast)
                .unwrap_or(u32::MAX << 8);
            let rank = if preferred.is_some_and(|p| same_subnet(p, ip, mask)) {
                0
            } else if local.iter().any(|i| same_subnet(i.ip, ip, mask)) {
                1
            } else {
                2
            };
            Some((rank, ip))
        })
        .collect();
    ranked.sort_by_key(|(rank, _)| *rank);
    ranked.into_iter().map(|(_, ip)| ip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(ip: &str, brd: &str) -> (String, String) {
        (ip.to_string(), brd.to_string())
    }

    #[test]
    fn test_mask_from_broadcast() {
        assert_eq!(mask_from_broadcast(Ipv4Addr::new(192, 168, 1, 255)), 0xFFFF_FF00);
        assert_eq!(mask_from_broadcast(Ipv4Addr::new(10, 8, 255, 255)), 0xFFFF_0000);
        assert_eq!(mask_from_broadcast(Ipv4Addr::BROADCAST), 0);
    }

    #[test]
    fn test_local_subnet_first() {
        let pairs = [
            pair("10.1.0.5", "10.1.255.255"),
            pair("192.168.1.7", "192.168.1.255"),
            pair("172.16.0.9", "172.16.0.255"),
        ];
        let local = [Interface::with_prefix(Ipv4Addr::new(192, 168, 1, 40), 24)];
        let ordered = order_addresses(&pairs, None, &local);
        assert_eq!(
            ordered,
            vec![
                Ipv4Addr::new(192, 168, 1, 7),
                Ipv4Addr::new(10, 1, 0, 5),
                Ipv4Addr::new(172, 16, 0, 9),
            ]
        );
    }

    #[test]
    fn test_preferred_subnet_beats_local() {
        let pairs = [
            pair("192.168.1.7", "192.168.1.255"),
            pair("not-an-ip", "x"),
            pair("172.16.0.9", "172.16.0.255"),
        ];
        let local = [Interface::with_prefix(Ipv4Addr::new(192, 168, 1, 40), 24)];
        let ordered = order_addresses(&pairs, Some(Ipv4Addr::new(172, 16, 0, 0)), &local);
        assert_eq!(
            ordered,
            vec![Ipv4Addr::new(172, 16, 0, 9), Ipv4Addr::new(192, 168, 1, 7)]
        );
    }
}
