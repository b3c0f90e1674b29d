// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Proxy and registrar addresses.
//!
//! A proxy listens on three consecutive ports: publish `P`, subscribe
//! `P + 1` and control `P + 2`. Only `P` is ever configured; the other two
//! are always derived from it.

use crate::config::{
    DEFAULT_PROXY_PORT, DEFAULT_REGISTRAR_PORT, MAX_PROXY_PORT, PROXY_CONTROL_OFFSET,
    PROXY_SUB_OFFSET,
};
use crate::error::{Error, Result};
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .find(|a| a.is_ipv4())
        .ok_or_else(|| Error::Config(format!("cannot resolve {}:{}", host, port)))
}

/// Address of a proxy, identified by its publish port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyAddress {
    host: String,
    pub_port: u16,
}

impl ProxyAddress {
    /// Proxy at `host` with publish port `pub_port`.
    pub fn new(host: impl Into<String>, pub_port: u16) -> Self {
        Self {
            host: host.into(),
            pub_port,
        }
    }

    /// Proxy at `host` on the default port.
    pub fn with_host(host: impl Into<String>) -> Self {
        Self::new(host, DEFAULT_PROXY_PORT)
    }

    /// Host name or IP.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Publish port.
    pub fn pub_port(&self) -> u16 {
        self.pub_port
    }

    fn derived_port(&self, offset: u16) -> Result<u16> {
        if self.pub_port > MAX_PROXY_PORT {
            return Err(Error::Config(format!(
                "proxy port {} leaves no room for its subscribe and control ports",
                self.pub_port
            )));
        }
        self.pub_port
            .checked_add(offset)
            .ok_or_else(|| Error::Config(format!("proxy port {} + {} overflows", self.pub_port, offset)))
    }

    /// Subscribe port, always publish port + 1.
    pub fn sub_port(&self) -> Result<u16> {
        self.derived_port(PROXY_SUB_OFFSET)
    }

    /// Control port, always publish port + 2.
    pub fn control_port(&self) -> Result<u16> {
        self.derived_port(PROXY_CONTROL_OFFSET)
    }

    /// Resolved publish endpoint.
    pub fn pub_addr(&self) -> Result<SocketAddr> {
        resolve(&self.host, self.pub_port)
    }

    /// Resolved subscribe endpoint.
    pub fn sub_addr(&self) -> Result<SocketAddr> {
        resolve(&self.host, self.sub_port()?)
    }

    /// Resolved control endpoint.
    pub fn control_addr(&self) -> Result<SocketAddr> {
        resolve(&self.host, self.control_port()?)
    }
}

impl Default for ProxyAddress {
    fn default() -> Self {
        Self::with_host("localhost")
    }
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.pub_port)
    }
}

/// Address of a registrar.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegAddress {
    host: String,
    port: u16,
}

impl RegAddress {
    /// Registrar at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Registrar at `host` on the default port.
    pub fn with_host(host: impl Into<String>) -> Self {
        Self::new(host, DEFAULT_REGISTRAR_PORT)
    }

    /// Host name or IP.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolved endpoint.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        resolve(&self.host, self.port)
    }
}

impl Default for RegAddress {
    fn default() -> Self {
        Self::with_host("localhost")
    }
}

impl fmt::Display for RegAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
