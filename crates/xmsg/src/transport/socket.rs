// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Publish, subscribe and control sockets.
//!
//! Each socket owns one TCP link to a proxy port. Outbound frames are written
//! directly by the caller; inbound frames are decoded by a reader thread
//! into a bounded inbox that can be polled or multiplexed with
//! [`crossbeam::channel::Select`].

use super::frame_codec::{FrameCodec, Frames};
use super::inbound::spawn_reader;
use super::net::connect_stream;
use crate::config::{CMD_SUBSCRIBE, CMD_UNSUBSCRIBE};
use crate::context::SocketLease;
use crate::error::{Error, Result};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

fn write_frames<F: AsRef<[u8]>>(stream: &Mutex<TcpStream>, frames: &[F]) -> Result<()> {
    let buf = FrameCodec::encode(frames);
    stream.lock().write_all(&buf)?;
    Ok(())
}

// ============================================================================
// Publish socket
// ============================================================================

/// Write-only link to a proxy publish port.
#[derive(Debug)]
pub struct PubSocket {
    stream: Mutex<TcpStream>,
    peer: SocketAddr,
    closed: AtomicBool,
    _lease: SocketLease,
}

impl PubSocket {
    pub(crate) fn connect(lease: SocketLease, addr: SocketAddr) -> Result<Self> {
        let stream = connect_stream(addr, lease.settings().connect_timeout)?;
        log::debug!("[transport] pub socket connected to {}", addr);
        Ok(Self {
            stream: Mutex::new(stream),
            peer: addr,
            closed: AtomicBool::new(false),
            _lease: lease,
        })
    }

    /// Send one multi-frame message.
    pub fn send<F: AsRef<[u8]>>(&self, frames: &[F]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed("pub socket"));
        }
        write_frames(&self.stream, frames)
    }

    /// Remote address of the link.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Shut the link down. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.stream.lock().shutdown(Shutdown::Both);
        }
    }
}

impl Drop for PubSocket {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Inbound link (shared by sub and control sockets)
// ============================================================================

#[derive(Debug)]
struct InboundLink {
    what: &'static str,
    stream: Mutex<TcpStream>,
    inbox: Receiver<Frames>,
    reader: Mutex<Option<JoinHandle<()>>>,
    peer: SocketAddr,
    closed: AtomicBool,
    _lease: SocketLease,
}

impl InboundLink {
    fn connect(lease: SocketLease, addr: SocketAddr, what: &'static str) -> Result<Self> {
        let settings = lease.settings();
        let stream = connect_stream(addr, settings.connect_timeout)?;
        let (tx, inbox) = bounded(settings.inbox_capacity);
        let reader = spawn_reader(
            format!("xmsg-{}-{}", what, addr.port()),
            stream.try_clone()?,
            settings.max_message_size,
            tx,
        );
        log::debug!("[transport] {} socket connected to {}", what, addr);
        Ok(Self {
            what,
            stream: Mutex::new(stream),
            inbox,
            reader: Mutex::new(Some(reader)),
            peer: addr,
            closed: AtomicBool::new(false),
            _lease: lease,
        })
    }

    fn send<F: AsRef<[u8]>>(&self, frames: &[F]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed(self.what));
        }
        write_frames(&self.stream, frames)
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Frames>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed(self.what));
        }
        match self.inbox.recv_timeout(timeout) {
            Ok(frames) => Ok(Some(frames)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Transport(format!(
                "{} link to {} closed",
                self.what, self.peer
            ))),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.stream.lock().shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.lock().take() {
            let _ = reader.join();
        }
    }
}

impl Drop for InboundLink {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Subscribe socket
// ============================================================================

/// Link to a proxy subscribe port.
///
/// Subscriptions are sent to the proxy as `["subscribe", topic]` commands;
/// the proxy then forwards every message whose topic starts with one of
/// them.
#[derive(Debug)]
pub struct SubSocket {
    link: InboundLink,
}

impl SubSocket {
    pub(crate) fn connect(lease: SocketLease, addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            link: InboundLink::connect(lease, addr, "sub")?,
        })
    }

    /// Start receiving messages whose topic starts with `topic`.
    pub fn subscribe(&self, topic: &str) -> Result<()> {
        self.link.send(&[CMD_SUBSCRIBE.as_bytes(), topic.as_bytes()])
    }

    /// Stop receiving messages for `topic`.
    pub fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.link.send(&[CMD_UNSUBSCRIBE.as_bytes(), topic.as_bytes()])
    }

    /// Wait up to `timeout` for a message. `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Frames>> {
        self.link.recv_timeout(timeout)
    }

    /// Inbox channel, for multiplexing several sockets.
    pub fn inbox(&self) -> &Receiver<Frames> {
        &self.link.inbox
    }

    /// Remote address of the link.
    pub fn peer_addr(&self) -> SocketAddr {
        self.link.peer
    }

    /// Shut the link down and join its reader. Idempotent.
    pub fn close(&self) {
        self.link.close();
    }
}

// ============================================================================
// Control socket
// ============================================================================

/// Link to a proxy control port, registered under an identity.
///
/// The proxy answers connection probes carrying this identity on this link.
#[derive(Debug)]
pub struct ControlSocket {
    identity: String,
    link: InboundLink,
}

impl ControlSocket {
    pub(crate) fn connect(lease: SocketLease, addr: SocketAddr, identity: &str) -> Result<Self> {
        let link = InboundLink::connect(lease, addr, "control")?;
        link.send(&[identity.as_bytes()])?;
        Ok(Self {
            identity: identity.to_string(),
            link,
        })
    }

    /// Identity this link was registered under.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Wait up to `timeout` for a message. `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Frames>> {
        self.link.recv_timeout(timeout)
    }

    /// Shut the link down and join its reader. Idempotent.
    pub fn close(&self) {
        self.link.close();
    }
}
