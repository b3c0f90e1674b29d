// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Proxy driver: one publish or subscribe link to a proxy.
//!
//! # Control channel
//!
//! Publish connections and subscriptions are confirmed before the caller
//! relies on them:
//!
//! ```text
//! connection:   pub  --[xmsg:control, pub, id]-->  proxy
//!               ctrl <--[pub, id]-----------------  proxy   (ctrl registered as id)
//!
//! subscription: probe --[xmsg:control, sub, topic]--> proxy
//!               sub   <--[topic, sub]---------------- proxy   (routed like topic traffic)
//! ```
//!
//! Each probe is re-sent once per poll slice until its echo arrives or the
//! total timeout elapses, which also covers the window where the proxy has
//! not yet seen the control link or the subscription.

use super::address::ProxyAddress;
use crate::config::{ConnectionSetup, CTRL_CONNECT, CTRL_SUBSCRIBE, CTRL_TOPIC};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::topic::Topic;
use crate::transport::{Frames, PubSocket, SubSocket};
use crossbeam::channel::Receiver;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Role of a driver. A driver never holds both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Owns a publish socket.
    Publisher,
    /// Owns a subscribe socket.
    Subscriber,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Publisher => f.write_str("publisher"),
            Role::Subscriber => f.write_str("subscriber"),
        }
    }
}

#[derive(Debug)]
enum Endpoint {
    Pub(PubSocket),
    Sub(SubSocket),
}

/// Random identity used on the control channel.
pub(crate) fn generate_identity() -> String {
    format!("{:08x}{:08x}", fastrand::u32(..), fastrand::u32(..))
}

/// Connection to a proxy in one role.
#[derive(Debug)]
pub struct ProxyDriver {
    ctx: Arc<Context>,
    address: ProxyAddress,
    identity: String,
    endpoint: Endpoint,
    closed: AtomicBool,
}

impl ProxyDriver {
    /// Open the link for `role` to `address`.
    pub fn connect(ctx: &Arc<Context>, address: ProxyAddress, role: Role) -> Result<Self> {
        let endpoint = match role {
            Role::Publisher => Endpoint::Pub(ctx.pub_socket(address.pub_addr()?)?),
            Role::Subscriber => Endpoint::Sub(ctx.sub_socket(address.sub_addr()?)?),
        };
        Ok(Self {
            ctx: Arc::clone(ctx),
            address,
            identity: generate_identity(),
            endpoint,
            closed: AtomicBool::new(false),
        })
    }

    /// Publisher-role driver.
    pub fn publisher(ctx: &Arc<Context>, address: ProxyAddress) -> Result<Self> {
        Self::connect(ctx, address, Role::Publisher)
    }

    /// Subscriber-role driver.
    pub fn subscriber(ctx: &Arc<Context>, address: ProxyAddress) -> Result<Self> {
        Self::connect(ctx, address, Role::Subscriber)
    }

    /// Role of this driver.
    pub fn role(&self) -> Role {
        match self.endpoint {
            Endpoint::Pub(_) => Role::Publisher,
            Endpoint::Sub(_) => Role::Subscriber,
        }
    }

    /// Proxy this driver talks to.
    pub fn address(&self) -> &ProxyAddress {
        &self.address
    }

    /// Control-channel identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// True once [`ProxyDriver::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed("proxy driver"));
        }
        Ok(())
    }

    /// Confirm that the proxy forwards this driver's publications.
    ///
    /// Always true for a subscriber. Returns `Ok(false)` when no echo
    /// arrived within `setup.connection_timeout`.
    pub fn check_connection(&self, setup: &ConnectionSetup) -> Result<bool> {
        self.ensure_open()?;
        match &self.endpoint {
            Endpoint::Sub(_) => Ok(true),
            Endpoint::Pub(socket) => confirm_connection(self, socket, setup),
        }
    }

    /// Confirm that the proxy has registered a subscription to `topic`.
    ///
    /// Undefined for a publisher. Messages arriving during the probe are
    /// discarded. Returns `Ok(false)` when no echo arrived within
    /// `setup.subscription_timeout`.
    pub fn check_subscription(&self, topic: &Topic, setup: &ConnectionSetup) -> Result<bool> {
        self.ensure_open()?;
        match &self.endpoint {
            Endpoint::Pub(_) => Err(Error::Unsupported(
                "check_subscription on a publisher driver".into(),
            )),
            Endpoint::Sub(socket) => confirm_subscription(self, socket, topic, setup),
        }
    }

    /// Subscribe to `topic` and every child topic.
    pub fn subscribe(&self, topic: &Topic) -> Result<()> {
        self.ensure_open()?;
        self.sub_socket()?.subscribe(topic.as_str())
    }

    /// Drop a subscription.
    pub fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        self.ensure_open()?;
        self.sub_socket()?.unsubscribe(topic.as_str())
    }

    /// Publish a message.
    pub fn send(&self, message: &Message) -> Result<()> {
        self.send_frames(&message.to_frames())
    }

    /// Publish raw frames.
    pub fn send_frames<F: AsRef<[u8]>>(&self, frames: &[F]) -> Result<()> {
        self.ensure_open()?;
        match &self.endpoint {
            Endpoint::Pub(socket) => socket.send(frames),
            Endpoint::Sub(_) => Err(Error::Unsupported("send on a subscriber driver".into())),
        }
    }

    /// Wait up to `timeout` for the next raw message, control frames
    /// included.
    pub fn recv(&self, timeout: Duration) -> Result<Option<Frames>> {
        self.ensure_open()?;
        self.sub_socket()?.recv_timeout(timeout)
    }

    pub(crate) fn inbox(&self) -> Option<&Receiver<Frames>> {
        match &self.endpoint {
            Endpoint::Sub(socket) => Some(socket.inbox()),
            Endpoint::Pub(_) => None,
        }
    }

    fn sub_socket(&self) -> Result<&SubSocket> {
        match &self.endpoint {
            Endpoint::Sub(socket) => Ok(socket),
            Endpoint::Pub(_) => Err(Error::Unsupported(format!(
                "{} driver has no subscribe socket",
                self.role()
            ))),
        }
    }

    /// Close the link. Only the first call has an effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match &self.endpoint {
            Endpoint::Pub(socket) => socket.close(),
            Endpoint::Sub(socket) => socket.close(),
        }
        log::debug!("[driver] {} link to {} closed", self.role(), self.address);
    }
}

impl Drop for ProxyDriver {
    fn drop(&mut self) {
        self.close();
    }
}

fn remaining(until: Instant) -> Duration {
    until.saturating_duration_since(Instant::now())
}

fn confirm_connection(
    driver: &ProxyDriver,
    socket: &PubSocket,
    setup: &ConnectionSetup,
) -> Result<bool> {
    let control = driver
        .ctx
        .control_socket(driver.address.control_addr()?, &driver.identity)?;
    let probe = [CTRL_TOPIC, CTRL_CONNECT, driver.identity.as_str()];
    let deadline = Instant::now() + setup.connection_timeout;

    let confirmed = loop {
        if Instant::now() >= deadline {
            break false;
        }
        socket.send(&probe)?;
        let slice_end = Instant::now() + setup.poll_slice.min(remaining(deadline));
        let mut echoed = false;
        while let Some(frames) = control.recv_timeout(remaining(slice_end))? {
            if frames.len() == 2
                && frames[0] == CTRL_CONNECT.as_bytes()
                && frames[1] == driver.identity.as_bytes()
            {
                echoed = true;
                break;
            }
        }
        if echoed {
            break true;
        }
    };
    control.close();

    if confirmed {
        log::debug!("[driver] connection to {} confirmed", driver.address);
    } else {
        log::warn!(
            "[driver] no connection echo from {} within {:?}",
            driver.address,
            setup.connection_timeout
        );
    }
    Ok(confirmed)
}

fn confirm_subscription(
    driver: &ProxyDriver,
    socket: &SubSocket,
    topic: &Topic,
    setup: &ConnectionSetup,
) -> Result<bool> {
    let probe_socket = driver.ctx.pub_socket(driver.address.pub_addr()?)?;
    let probe = [CTRL_TOPIC, CTRL_SUBSCRIBE, topic.as_str()];
    let deadline = Instant::now() + setup.subscription_timeout;

    let confirmed = loop {
        if Instant::now() >= deadline {
            break false;
        }
        probe_socket.send(&probe)?;
        let slice_end = Instant::now() + setup.poll_slice.min(remaining(deadline));
        let mut echoed = false;
        while let Some(frames) = socket.recv_timeout(remaining(slice_end))? {
            if frames.len() == 2
                && frames[0] == topic.as_str().as_bytes()
                && frames[1] == CTRL_SUBSCRIBE.as_bytes()
            {
                echoed = true;
                break;
            }
        }
        if echoed {
            break true;
        }
    };
    probe_socket.close();

    if confirmed {
        log::debug!("[driver] subscription to {} confirmed", topic);
    }
    Ok(confirmed)
}
