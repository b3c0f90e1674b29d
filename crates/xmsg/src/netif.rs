// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Local host name and IPv4 interfaces.
//!
//! Interfaces are discovered per platform:
//! - Linux: parses `ip -4 addr show` output (address and broadcast)
//! - other: uses the `local_ip_address` crate, assuming a /24 broadcast

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};

/// One non-loopback IPv4 interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interface {
    /// Interface address.
    pub ip: Ipv4Addr,
    /// Broadcast address of its subnet.
    pub broadcast: Ipv4Addr,
}

impl Interface {
    /// Interface with a broadcast derived from `prefix_len`.
    pub fn with_prefix(ip: Ipv4Addr, prefix_len: u8) -> Self {
        let host_bits = 32u32.saturating_sub(u32::from(prefix_len.min(32)));
        let host_mask = if host_bits >= 32 {
            u32::MAX
        } else {
            (1u32 << host_bits) - 1
        };
        Self {
            ip,
            broadcast: Ipv4Addr::from(u32::from(ip) | host_mask),
        }
    }
}

/// Canonical host name of this machine.
#[cfg(unix)]
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY:
    // - buf is a valid mutable buffer with known size (256 bytes)
    // - gethostname writes at most buf.len() bytes including NUL terminator
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).into_owned();
    if name.is_empty() {
        "localhost".to_string()
    } else {
        name
    }
}

/// Canonical host name of this machine.
#[cfg(not(unix))]
pub fn hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}

/// Non-loopback IPv4 interfaces of this machine.
pub fn interfaces() -> Vec<Interface> {
    interfaces_platform()
}

#[cfg(target_os = "linux")]
fn interfaces_platform() -> Vec<Interface> {
    use std::process::Command;

    match Command::new("ip").args(["-4", "addr", "show"]).output() {
        Ok(output) => parse_ip_addr_show(&String::from_utf8_lossy(&output.stdout)),
        Err(_) => {
            log::debug!("[netif] 'ip' command not found, using local_ip_address crate");
            interfaces_crate()
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn interfaces_platform() -> Vec<Interface> {
    interfaces_crate()
}

fn interfaces_crate() -> Vec<Interface> {
    let list = match local_ip_address::list_afinet_netifas() {
        Ok(list) => list,
        Err(e) => {
            log::debug!("[netif] failed to list network interfaces: {}", e);
            return Vec::new();
        }
    };
    list.into_iter()
        .filter_map(|(_name, ip)| match ip {
            IpAddr::V4(v4) if !v4.is_loopback() => Some(Interface::with_prefix(v4, 24)),
            _ => None,
        })
        .collect()
}

/// Parse `ip -4 addr show` output.
///
/// ```text
///     inet 192.168.1.5/24 brd 192.168.1.255 scope global eth0
/// ```
pub(crate) fn parse_ip_addr_show(output: &str) -> Vec<Interface> {
    let mut result = Vec::new();
    for line in output.lines() {
        let Some(rest) = line.trim().strip_prefix("inet ") else {
            continue;
        };
        let mut words = rest.split_whitespace();
        let Some(cidr) = words.next() else {
            continue;
        };
        let mut cidr = cidr.split('/');
        let Some(Ok(ip)) = cidr.next().map(str::parse::<Ipv4Addr>) else {
            continue;
        };
        if ip.is_loopback() {
            continue;
        }
        let prefix = cidr.next().and_then(|p| p.parse::<u8>().ok()).unwrap_or(24);

        let mut iface = Interface::with_prefix(ip, prefix);
        while let Some(word) = words.next() {
            if word == "brd" {
                if let Some(Ok(brd)) = words.next().map(str::parse::<Ipv4Addr>) {
                    iface.broadcast = brd;
                }
                break;
            }
        }
        result.push(iface);
    }
    result
}

/// True when `host` names this machine.
pub fn is_local_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") || host == hostname() {
        return true;
    }
    let Ok(addrs) = (host, 0u16).to_socket_addrs() else {
        return false;
    };
    let local = interfaces();
    addrs.into_iter().any(|a| match a.ip() {
        IpAddr::V4(v4) => v4.is_loopback() || local.iter().any(|i| i.ip == v4),
        IpAddr::V6(v6) => v6.is_loopback(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN group default qlen 1000
    inet 127.0.0.1/8 scope host lo
       valid_lft forever preferred_lft forever
2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc mq state UP group default qlen 1000
    inet 192.168.1.5/24 brd 192.168.1.255 scope global dynamic eth0
       valid_lft 85000sec preferred_lft 85000sec
3: tun0: <POINTOPOINT,UP> mtu 1400
    inet 10.8.0.2/16 scope global tun0
";

    #[test]
    fn test_parse_ip_addr_show() {
        let ifaces = parse_ip_addr_show(SAMPLE);
        assert_eq!(
            ifaces,
            vec![
                Interface {
                    ip: Ipv4Addr::new(192, 168, 1, 5),
                    broadcast: Ipv4Addr::new(192, 168, 1, 255),
                },
                Interface {
                    ip: Ipv4Addr::new(10, 8, 0, 2),
                    broadcast: Ipv4Addr::new(10, 8, 255, 255),
                },
            ]
        );
    }

    #[test]
    fn test_with_prefix_edges() {
        let ip = Ipv4Addr::new(10, 1, 2, 3);
        assert_eq!(Interface::with_prefix(ip, 32).broadcast, ip);
        assert_eq!(
            Interface::with_prefix(ip, 0).broadcast,
            Ipv4Addr::new(255, 255, 255, 255)
        );
    }

    #[test]
    fn test_hostname_is_local() {
        let name = hostname();
        assert!(!name.is_empty());
        assert!(is_local_host(&name));
        assert!(is_local_host("127.0.0.1"));
        assert!(is_local_host("LOCALHOST"));
    }
}
