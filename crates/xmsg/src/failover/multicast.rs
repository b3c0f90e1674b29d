// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Client side of multicast discovery.
//!
//! ```text
//!   xmsg-mc-send: sleep(startup delay), then every send_interval
//!                 send the request on every interface
//!   xmsg-mc-recv: recv (receive_quantum) until a reply with the magic
//!                 numbers arrives, hand it over, exit
//!   caller:       wait for the first reply (bounded or not), stop both
//! ```

use crate::config::{DiscoverySettings, KIND_MULTICAST};
use crate::error::{Error, Result};
use crate::nameserver::protocol::{HandshakeRequest, MulticastReply};
use crate::netif;
use crate::transport::net::bind_udp;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use socket2::SockRef;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// TTL of discovery datagrams.
const MULTICAST_TTL: u32 = 32;

/// Largest reply accepted.
const MAX_REPLY: usize = 64 * 1024;

/// First valid discovery reply and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    /// Sender of the reply.
    pub from: SocketAddr,
    /// Decoded reply.
    pub reply: MulticastReply,
}

/// Discover a name server by sending requests to `target` until one valid
/// reply arrives or `timeout` expires (`None` waits forever).
pub fn discover(
    target: SocketAddrV4,
    password: Option<&str>,
    timeout: Option<Duration>,
    settings: &DiscoverySettings,
) -> Result<Discovered> {
    let socket = bind_udp(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())?;
    socket.set_read_timeout(Some(settings.receive_quantum))?;
    if target.ip().is_multicast() {
        let _ = socket.set_multicast_loop_v4(true);
        let _ = socket.set_multicast_ttl_v4(MULTICAST_TTL);
    }
    let socket = Arc::new(socket);
    let stop = Arc::new(AtomicBool::new(false));
    let (found_tx, found_rx) = bounded::<Discovered>(1);

    let receiver = {
        let socket = Arc::clone(&socket);
        let stop = Arc::clone(&stop);
        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        thread::Builder::new()
            .name("xmsg-mc-recv".into())
            .spawn(move || {
                if let Some(found) = receive_reply(&socket, &stop) {
                    let _ = found_tx.send(found);
                }
            })
            .expect("failed to spawn discovery receiver")
    };
    let (wake_tx, wake_rx) = bounded::<()>(0);
    let sender = {
        let socket = Arc::clone(&socket);
        let stop = Arc::clone(&stop);
        let packet = HandshakeRequest::new(KIND_MULTICAST, password).encode();
        let settings = settings.clone();
        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        thread::Builder::new()
            .name("xmsg-mc-send".into())
            .spawn(move || send_requests(&socket, target, &packet, &settings, &stop, &wake_rx))
            .expect("failed to spawn discovery sender")
    };

    let outcome = wait_first(&found_rx, timeout);
    finish(&stop, wake_tx, sender, receiver);

    match outcome {
        Some(found) => {
            log::debug!(
                "[multicast] name server found at {} (tcp {})",
                found.from,
                found.reply.tcp_port
            );
            Ok(found)
        }
        None => Err(Error::Timeout(format!("no multicast reply from {}", target))),
    }
}

fn wait_first(found: &Receiver<Discovered>, timeout: Option<Duration>) -> Option<Discovered> {
    match timeout {
        Some(timeout) => found.recv_timeout(timeout).ok(),
        None => found.recv().ok(),
    }
}

fn finish(stop: &AtomicBool, wake: Sender<()>, sender: JoinHandle<()>, receiver: JoinHandle<()>) {
    stop.store(true, Ordering::Release);
    drop(wake);
    let _ = sender.join();
    let _ = receiver.join();
}

fn send_requests(
    socket: &UdpSocket,
    target: SocketAddrV4,
    packet: &[u8],
    settings: &DiscoverySettings,
    stop: &AtomicBool,
    wake: &Receiver<()>,
) {
    if !matches!(
        wake.recv_timeout(settings.receiver_startup_delay),
        Err(RecvTimeoutError::Timeout)
    ) {
        return;
    }
    let interfaces = if target.ip().is_multicast() {
        netif::interfaces()
    } else {
        Vec::new()
    };

    while !stop.load(Ordering::Acquire) {
        if interfaces.is_empty() {
            send_one(socket, target, packet);
        }
        for iface in &interfaces {
            if stop.load(Ordering::Acquire) {
                return;
            }
            if let Err(e) = SockRef::from(socket).set_multicast_if_v4(&iface.ip) {
                log::debug!("[multicast] cannot select interface {}: {}", iface.ip, e);
                continue;
            }
            send_one(socket, target, packet);
        }
        if !matches!(
            wake.recv_timeout(settings.send_interval),
            Err(RecvTimeoutError::Timeout)
        ) {
            return;
        }
    }
}

fn send_one(socket: &UdpSocket, target: SocketAddrV4, packet: &[u8]) {
    if let Err(e) = socket.send_to(packet, target) {
        log::debug!("[multicast] send to {} failed: {}", target, e);
    }
}

fn receive_reply(socket: &UdpSocket, stop: &AtomicBool) -> Option<Discovered> {
    let mut buf = vec![0u8; MAX_REPLY];
    while !stop.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => match MulticastReply::decode(&buf[..len]) {
                Ok(reply) => return Some(Discovered { from, reply }),
                Err(e) => log::debug!("[multicast] ignoring datagram from {}: {}", from, e),
            },
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                log::warn!("[multicast] receive failed: {}", e);
                return None;
            }
        }
    }
    None
}
