// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Multicast discovery responder.
//!
//! Answers valid discovery requests with the name server's TCP port and
//! the `(ip, broadcast)` pairs of this host. Anything else is dropped.

use super::protocol::{HandshakeRequest, MulticastReply};
use crate::config::{KIND_MULTICAST, PROTOCOL_VERSION};
use crate::netif::{self, Interface};
use crate::transport::net::bind_udp;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Read timeout between two running-flag checks.
const RECV_QUANTUM: Duration = Duration::from_millis(200);

/// Largest discovery datagram accepted.
const MAX_DATAGRAM: usize = 2048;

/// Handle to a running responder.
#[derive(Debug)]
pub struct MulticastResponder {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MulticastResponder {
    /// Bind `udp_port`, join `group` and answer on behalf of a name server
    /// listening on `tcp_port`.
    pub fn start(
        udp_port: u16,
        group: Ipv4Addr,
        tcp_port: u16,
        password: Option<String>,
    ) -> io::Result<Self> {
        let socket = bind_udp(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, udp_port).into())?;
        let interfaces = netif::interfaces();
        join_group(&socket, group, &interfaces);
        socket.set_read_timeout(Some(RECV_QUANTUM))?;
        let local_addr = socket.local_addr()?;

        let mut addresses: Vec<(String, String)> = interfaces
            .iter()
            .map(|i| (i.ip.to_string(), i.broadcast.to_string()))
            .collect();
        if addresses.is_empty() {
            let lo = Interface::with_prefix(Ipv4Addr::LOCALHOST, 8);
            addresses.push((lo.ip.to_string(), lo.broadcast.to_string()));
        }
        let reply = MulticastReply {
            tcp_port,
            udp_port: local_addr.port(),
            addresses,
        }
        .encode();

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);
        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        let handle = thread::Builder::new()
            .name("xmsg-ns-multicast".into())
            .spawn(move || respond_loop(&socket, &reply, password.as_deref(), &running_clone))
            .expect("failed to spawn multicast responder thread");

        log::info!("[nameserver] multicast responder on {} (group {})", local_addr, group);
        Ok(Self {
            local_addr,
            running,
            handle: Some(handle),
        })
    }

    /// Bound UDP address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop and join. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MulticastResponder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn join_group(socket: &UdpSocket, group: Ipv4Addr, interfaces: &[Interface]) {
    if interfaces.is_empty() {
        if let Err(e) = socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED) {
            log::warn!("[multicast] join {} failed (non-fatal): {}", group, e);
        }
        return;
    }
    for iface in interfaces {
        match socket.join_multicast_v4(&group, &iface.ip) {
            Ok(()) => log::debug!("[multicast] joined {} on {}", group, iface.ip),
            Err(e) => log::debug!("[multicast] join {} on {} failed (non-fatal): {}", group, iface.ip, e),
        }
    }
}

fn respond_loop(socket: &UdpSocket, reply: &[u8], password: Option<&str>, running: &AtomicBool) {
    let mut buf = [0u8; MAX_DATAGRAM];
    while running.load(Ordering::Acquire) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::error!("[multicast] receive failed: {}", e);
                break;
            }
        };

        let request = match HandshakeRequest::decode(&buf[..len]) {
            Ok(request) => request,
            Err(e) => {
                log::debug!("[multicast] dropping datagram from {}: {}", from, e);
                continue;
            }
        };
        if request.version != PROTOCOL_VERSION || request.kind != KIND_MULTICAST {
            log::debug!(
                "[multicast] dropping request from {} (version {}, kind {})",
                from,
                request.version,
                request.kind
            );
            continue;
        }
        if password.is_some_and(|p| p != request.password) {
            log::debug!("[multicast] wrong password from {}", from);
            continue;
        }
        if let Err(e) = socket.send_to(reply, from) {
            log::debug!("[multicast] reply to {} lost: {}", from, e);
        }
    }
    log::debug!("[multicast] responder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_MULTICAST_ADDR, KIND_DIRECT_TCP};

    fn ask(responder: &MulticastResponder, request: &HandshakeRequest) -> Option<MulticastReply> {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let target = SocketAddr::from((Ipv4Addr::LOCALHOST, responder.local_addr().port()));
        client.send_to(&request.encode(), target).unwrap();
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, _) = client.recv_from(&mut buf).ok()?;
        MulticastReply::decode(&buf[..len]).ok()
    }

    #[test]
    fn test_answers_valid_request() {
        let mut responder =
            MulticastResponder::start(0, DEFAULT_MULTICAST_ADDR, 45123, Some("pw".into())).unwrap();

        let reply = ask(&responder, &HandshakeRequest::new(KIND_MULTICAST, Some("pw"))).unwrap();
        assert_eq!(reply.tcp_port, 45123);
        assert_eq!(reply.udp_port, responder.local_addr().port());
        assert!(!reply.addresses.is_empty());

        assert!(ask(&responder, &HandshakeRequest::new(KIND_MULTICAST, Some("no"))).is_none());
        assert!(ask(&responder, &HandshakeRequest::new(KIND_DIRECT_TCP, Some("pw"))).is_none());
        responder.stop();
    }
}
