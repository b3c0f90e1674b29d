// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Name-server accept loop.
//!
//! ```text
//!   mio::Poll (selector_timeout) --accept--> sniff 12 magic bytes
//!        ^                                   (non-blocking, bounded retries)
//!        |                                          |
//!   shutdown flag / waker               bad or silent: canned error, close
//!                                       good: blocking + TCP_NODELAY
//!                                              |
//!                                              v
//!                                    xmsg-ns-worker thread (one request)
//! ```
//!
//! The loop never waits on a client beyond the sniff budget
//! (`sniff_quantum * sniff_attempts`).

use super::protocol::{is_magic, HandshakeReply};
use super::worker::{serve_client, WorkerPolicy};
use crate::config::{NameServerSettings, ERR_BAD_FORMAT, MAGIC_LEN};
use mio::net::TcpListener as MioListener;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const LISTENER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);
const MAX_EVENTS: usize = 16;

/// Message of the canned reply to a connection without the magic prefix.
const BAD_FORMAT_MESSAGE: &str = "incorrect format";

/// Accept-loop counters.
#[derive(Debug, Default)]
pub struct AcceptMetrics {
    /// Connections handed to a worker.
    pub accepted: AtomicU64,
    /// Connections closed after a failed sniff.
    pub rejected: AtomicU64,
}

impl AcceptMetrics {
    /// `(accepted, rejected)`.
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.accepted.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
        )
    }
}

/// Handle to a running accept loop.
#[derive(Debug)]
pub(crate) struct AcceptLoop {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
    metrics: Arc<AcceptMetrics>,
    handle: Option<JoinHandle<()>>,
}

impl AcceptLoop {
    /// Start accepting on `listener`.
    pub(crate) fn spawn(listener: TcpListener, settings: &NameServerSettings) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let mut listener = MioListener::from_std(listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let shutdown = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(AcceptMetrics::default());
        let state = LoopState {
            poll,
            listener,
            shutdown: Arc::clone(&shutdown),
            metrics: Arc::clone(&metrics),
            selector_timeout: settings.selector_timeout,
            sniff_quantum: settings.sniff_quantum,
            sniff_attempts: settings.sniff_attempts,
            policy: WorkerPolicy {
                password: settings.password.clone(),
                domain_port: settings.domain_port,
                timeout: settings.worker_timeout,
            },
            workers: Vec::new(),
        };

        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        let handle = thread::Builder::new()
            .name("xmsg-ns-accept".into())
            .spawn(move || state.run())
            .expect("failed to spawn name-server accept thread");

        Ok(Self {
            local_addr,
            shutdown,
            waker,
            metrics,
            handle: Some(handle),
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn metrics(&self) -> &AcceptMetrics {
        &self.metrics
    }

    /// Raise the shutdown flag and join the loop and its workers.
    pub(crate) fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.waker.wake();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AcceptLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

struct LoopState {
    poll: Poll,
    listener: MioListener,
    shutdown: Arc<AtomicBool>,
    metrics: Arc<AcceptMetrics>,
    selector_timeout: Duration,
    sniff_quantum: Duration,
    sniff_attempts: u32,
    policy: WorkerPolicy,
    workers: Vec<JoinHandle<()>>,
}

impl LoopState {
    fn run(mut self) {
        let mut events = Events::with_capacity(MAX_EVENTS);
        while !self.shutdown.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, Some(self.selector_timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("[nameserver] selector failed: {}", e);
                break;
            }
            let acceptable = events.iter().any(|e| e.token() == LISTENER_TOKEN);
            if acceptable {
                self.accept_pending();
            }
            self.workers.retain(|w| !w.is_finished());
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        log::debug!("[nameserver] accept loop stopped");
    }

    fn accept_pending(&mut self) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            match self.listener.accept() {
                Ok((stream, peer)) => self.on_accept(stream.into(), peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("[nameserver] accept failed: {}", e);
                    return;
                }
            }
        }
    }

    fn on_accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nonblocking(true) {
            log::warn!("[nameserver] cannot sniff {}: {}", peer, e);
            return;
        }
        match sniff_magic(&stream, self.sniff_quantum, self.sniff_attempts, &self.shutdown) {
            Ok(true) => {}
            Ok(false) => {
                log::warn!("[nameserver] {} sent no magic numbers, closing", peer);
                self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                reject(stream, self.sniff_quantum);
                return;
            }
            Err(e) => {
                log::debug!("[nameserver] sniffing {} failed: {}", peer, e);
                self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                reject(stream, self.sniff_quantum);
                return;
            }
        }

        if let Err(e) = stream
            .set_nonblocking(false)
            .and_then(|()| stream.set_nodelay(true))
        {
            log::warn!("[nameserver] cannot hand {} to a worker: {}", peer, e);
            return;
        }
        self.metrics.accepted.fetch_add(1, Ordering::Relaxed);

        let policy = self.policy.clone();
        match thread::Builder::new()
            .name("xmsg-ns-worker".into())
            .spawn(move || serve_client(stream, &policy))
        {
            Ok(worker) => self.workers.push(worker),
            Err(e) => log::error!("[nameserver] cannot spawn worker for {}: {}", peer, e),
        }
    }
}

/// Read exactly the magic prefix from a non-blocking stream.
///
/// Returns `Ok(false)` when the prefix is wrong or did not arrive within
/// `attempts` sleeps of `quantum`.
fn sniff_magic(
    mut stream: &TcpStream,
    quantum: Duration,
    attempts: u32,
    shutdown: &AtomicBool,
) -> io::Result<bool> {
    let mut prefix = [0u8; MAGIC_LEN];
    let mut filled = 0;
    let mut waited = 0;
    while filled < MAGIC_LEN {
        match stream.read(&mut prefix[filled..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "closed before the magic numbers",
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if waited >= attempts || shutdown.load(Ordering::Acquire) {
                    return Ok(false);
                }
                waited += 1;
                thread::sleep(quantum);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(is_magic(&prefix))
}

fn reject(mut stream: TcpStream, timeout: Duration) {
    let reply = HandshakeReply::Rejected {
        code: ERR_BAD_FORMAT,
        message: BAD_FORMAT_MESSAGE.into(),
    };
    // bounded write so a peer with a full window cannot stall the loop
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_write_timeout(Some(timeout.max(Duration::from_millis(1))));
    let _ = stream.write_all(&reply.encode());
    let _ = stream.shutdown(Shutdown::Both);
}
