// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Name server: TCP handshake service plus optional multicast responder.
//!
//! Clients either connect directly (`cMsg://host:port/...`) or discover the
//! server by multicast (`cMsg://multicast/...`); both end with the TCP
//! handshake that returns the proxy port to use.

mod accept_loop;
pub mod protocol;
mod responder;
mod worker;

pub use accept_loop::AcceptMetrics;
pub use protocol::{HandshakeReply, HandshakeRequest, MulticastReply};
pub use responder::MulticastResponder;

use crate::config::NameServerSettings;
use crate::error::Result;
use crate::transport::net::bind_listener;
use accept_loop::AcceptLoop;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// A running name server.
#[derive(Debug)]
pub struct NameServer {
    accept: AcceptLoop,
    responder: Option<MulticastResponder>,
}

impl NameServer {
    /// Validate `settings`, bind and start serving.
    pub fn start(settings: NameServerSettings) -> Result<Self> {
        settings.validate()?;
        let listener = bind_listener(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, settings.tcp_port).into())?;
        let accept = AcceptLoop::spawn(listener, &settings)?;
        let tcp_port = accept.local_addr().port();

        let responder = if settings.multicast {
            Some(MulticastResponder::start(
                settings.udp_port,
                settings.multicast_addr,
                tcp_port,
                settings.password.clone(),
            )?)
        } else {
            None
        };

        log::info!(
            "[nameserver] listening on tcp {} (domain port {})",
            accept.local_addr(),
            settings.domain_port
        );
        Ok(Self { accept, responder })
    }

    /// Bound TCP address.
    pub fn local_addr(&self) -> SocketAddr {
        self.accept.local_addr()
    }

    /// Bound UDP address of the multicast responder, if running.
    pub fn multicast_addr(&self) -> Option<SocketAddr> {
        self.responder.as_ref().map(MulticastResponder::local_addr)
    }

    /// Accept-loop counters.
    pub fn metrics(&self) -> &AcceptMetrics {
        self.accept.metrics()
    }

    /// Stop the responder, then the accept loop. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut responder) = self.responder.take() {
            responder.stop();
        }
        self.accept.stop();
    }
}

impl Drop for NameServer {
    fn drop(&mut self) {
        self.stop();
    }
}
