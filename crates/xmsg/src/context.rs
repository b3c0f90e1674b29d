// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Transport context.
//!
//! A [`Context`] is the factory for every socket an xMsg process opens. It is
//! an ordinary value shared through `Arc`, handed to whatever needs to create
//! sockets. After [`Context::terminate`] no new socket can be created; sockets
//! already open keep working until their owner closes them.

use crate::config::TransportSettings;
use crate::error::{Error, Result};
use crate::transport::{ControlSocket, PubSocket, RepSocket, ReqSocket, SubSocket};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Socket factory and bookkeeping.
#[derive(Debug)]
pub struct Context {
    settings: TransportSettings,
    terminated: AtomicBool,
    open: AtomicUsize,
}

impl Context {
    /// Context with default transport settings.
    pub fn new() -> Arc<Self> {
        Self::with_settings(TransportSettings::default())
    }

    /// Context with explicit transport settings.
    pub fn with_settings(settings: TransportSettings) -> Arc<Self> {
        Arc::new(Self {
            settings,
            terminated: AtomicBool::new(false),
            open: AtomicUsize::new(0),
        })
    }

    /// Transport settings applied to every socket.
    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Refuse any further socket creation.
    pub fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            log::debug!(
                "[context] terminated with {} socket(s) still open",
                self.open_sockets()
            );
        }
    }

    /// True once [`Context::terminate`] has been called.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Number of sockets created by this context and not yet dropped.
    pub fn open_sockets(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Publish socket connected to a proxy publish port.
    pub fn pub_socket(self: &Arc<Self>, addr: SocketAddr) -> Result<PubSocket> {
        PubSocket::connect(self.lease()?, addr)
    }

    /// Subscribe socket connected to a proxy subscribe port.
    pub fn sub_socket(self: &Arc<Self>, addr: SocketAddr) -> Result<SubSocket> {
        SubSocket::connect(self.lease()?, addr)
    }

    /// Control socket connected to a proxy control port under `identity`.
    pub fn control_socket(self: &Arc<Self>, addr: SocketAddr, identity: &str) -> Result<ControlSocket> {
        ControlSocket::connect(self.lease()?, addr, identity)
    }

    /// Request socket for a reply server at `addr`.
    pub fn req_socket(self: &Arc<Self>, addr: SocketAddr) -> Result<ReqSocket> {
        Ok(ReqSocket::new(self.lease()?, addr))
    }

    /// Reply socket bound to `addr`.
    pub fn rep_socket(self: &Arc<Self>, addr: SocketAddr) -> Result<RepSocket> {
        RepSocket::bind(self.lease()?, addr)
    }

    pub(crate) fn lease(self: &Arc<Self>) -> Result<SocketLease> {
        if self.is_terminated() {
            return Err(Error::InvalidState("context is terminated".into()));
        }
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(SocketLease {
            ctx: Arc::clone(self),
        })
    }
}

/// Accounts for one open socket; released on drop.
#[derive(Debug)]
pub(crate) struct SocketLease {
    ctx: Arc<Context>,
}

impl SocketLease {
    pub(crate) fn settings(&self) -> &TransportSettings {
        &self.ctx.settings
    }
}

impl Drop for SocketLease {
    fn drop(&mut self) {
        self.ctx.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_accounting() {
        let ctx = Context::new();
        let a = ctx.lease().unwrap();
        let b = ctx.lease().unwrap();
        assert_eq!(ctx.open_sockets(), 2);
        drop(a);
        assert_eq!(ctx.open_sockets(), 1);
        drop(b);
        assert_eq!(ctx.open_sockets(), 0);
    }

    #[test]
    fn test_terminate_refuses_new_sockets() {
        let ctx = Context::new();
        ctx.terminate();
        assert!(ctx.is_terminated());
        assert!(matches!(ctx.lease(), Err(Error::InvalidState(_))));
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert!(ctx.pub_socket(addr).is_err());
    }
}
