// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Socket-backed [`Dialer`].

use super::connector::{multicast_target, Dialer, ServerLocation};
use super::handshake::handshake;
use super::multicast::discover;
use crate::config::{ConnectionSetup, DiscoverySettings};
use crate::connection::{ProxyAddress, ProxyDriver};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::udl::ParsedUdl;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

/// Default timeout of the TCP handshake.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// An open session: a confirmed publisher link to the server's proxy.
#[derive(Debug)]
pub struct ServerSession {
    udl: String,
    driver: ProxyDriver,
}

impl ServerSession {
    /// UDL of the candidate that accepted.
    pub fn udl(&self) -> &str {
        &self.udl
    }

    /// Proxy address of the session.
    pub fn address(&self) -> &ProxyAddress {
        self.driver.address()
    }

    /// Publisher link to the proxy.
    pub fn driver(&self) -> &ProxyDriver {
        &self.driver
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.driver.close();
    }
}

/// Dialer over real sockets.
#[derive(Debug, Clone)]
pub struct NetDialer {
    ctx: Arc<Context>,
    setup: ConnectionSetup,
    discovery: DiscoverySettings,
    handshake_timeout: Duration,
}

impl NetDialer {
    /// Dialer opening proxy links from `ctx`.
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            setup: ConnectionSetup::default(),
            discovery: DiscoverySettings::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Set the proxy confirmation policy.
    pub fn with_setup(mut self, setup: ConnectionSetup) -> Self {
        self.setup = setup;
        self
    }

    /// Set multicast discovery timing.
    pub fn with_discovery(mut self, discovery: DiscoverySettings) -> Self {
        self.discovery = discovery;
        self
    }

    /// Set the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

impl Dialer for NetDialer {
    type Session = ServerSession;

    fn discover(&self, udl: &ParsedUdl) -> Result<ServerLocation> {
        let target = multicast_target(udl)?;
        let found = discover(
            target,
            udl.password.as_deref(),
            udl.multicast_timeout,
            &self.discovery,
        )?;
        Ok(ServerLocation {
            tcp_port: found.reply.tcp_port,
            addresses: found.reply.addresses,
        })
    }

    fn handshake(&self, host: &str, port: u16, udl: &ParsedUdl) -> Result<u16> {
        handshake(resolve(host, port)?, udl.password.as_deref(), self.handshake_timeout)
    }

    fn establish(&self, host: &str, port: u16, udl: &ParsedUdl) -> Result<ServerSession> {
        let driver = ProxyDriver::publisher(&self.ctx, ProxyAddress::new(host, port))?;
        if self.setup.check_connection && !driver.check_connection(&self.setup)? {
            driver.close();
            return Err(Error::Timeout(format!("proxy {}:{} did not confirm", host, port)));
        }
        Ok(ServerSession {
            udl: udl.udl.clone(),
            driver,
        })
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| Error::Transport(format!("{} has no IPv4 address", host)))
}
