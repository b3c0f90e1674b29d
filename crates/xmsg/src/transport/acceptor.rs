// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Accept thread multiplexing one or more listeners with mio.
//!
//! ```text
//! +-----------------------------------------------+
//! |                  Acceptor                     |
//! |   mio::Poll                                   |
//! |    - Listener 0..n (accept new links)         |
//! |    - Waker (stop request)                     |
//! |                      |                        |
//! |                      v                        |
//! |   on_accept(listener index, stream, peer)     |
//! +-----------------------------------------------+
//! ```
//!
//! Accepted streams are handed over in blocking mode.

use mio::net::TcpListener as MioListener;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Token for the waker (stop request)
const WAKER_TOKEN: Token = Token(0);

/// Starting token for listeners
const LISTENER_TOKEN_START: usize = 1;

/// Poll timeout between running-flag checks
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Maximum events to process per poll
const MAX_EVENTS: usize = 32;

/// Handle to a running accept thread.
#[derive(Debug)]
pub(crate) struct Acceptor {
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
    handle: Option<JoinHandle<()>>,
    local_addrs: Vec<SocketAddr>,
}

impl Acceptor {
    /// Spawn an accept thread over `listeners`.
    ///
    /// `on_accept` receives the index of the listener that accepted.
    pub(crate) fn spawn<F>(name: &str, listeners: Vec<TcpListener>, mut on_accept: F) -> io::Result<Self>
    where
        F: FnMut(usize, TcpStream, SocketAddr) + Send + 'static,
    {
        let mut poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let mut local_addrs = Vec::with_capacity(listeners.len());
        let mut mio_listeners = Vec::with_capacity(listeners.len());
        for (index, listener) in listeners.into_iter().enumerate() {
            listener.set_nonblocking(true)?;
            local_addrs.push(listener.local_addr()?);
            let mut listener = MioListener::from_std(listener);
            poll.registry().register(
                &mut listener,
                Token(LISTENER_TOKEN_START + index),
                Interest::READABLE,
            )?;
            mio_listeners.push(listener);
        }

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);
        let thread_name = name.to_string();

        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let mut events = Events::with_capacity(MAX_EVENTS);
                while running_clone.load(Ordering::Acquire) {
                    if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                        if e.kind() == io::ErrorKind::Interrupted {
                            continue;
                        }
                        log::error!("[transport] {} poll failed: {}", thread_name, e);
                        break;
                    }
                    for event in events.iter() {
                        if event.token() == WAKER_TOKEN {
                            continue;
                        }
                        let index = event.token().0 - LISTENER_TOKEN_START;
                        let Some(listener) = mio_listeners.get(index) else {
                            continue;
                        };
                        accept_pending(&thread_name, index, listener, &mut on_accept);
                    }
                }
                log::trace!("[transport] {} stopped", thread_name);
            })
            .expect("failed to spawn accept thread");

        Ok(Self {
            running,
            waker,
            handle: Some(handle),
            local_addrs,
        })
    }

    /// Bound addresses, in listener order.
    pub(crate) fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Stop accepting and join the thread. Idempotent.
    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.waker.wake();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_pending<F>(name: &str, index: usize, listener: &MioListener, on_accept: &mut F)
where
    F: FnMut(usize, TcpStream, SocketAddr),
{
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                let stream: TcpStream = stream.into();
                if let Err(e) = stream.set_nonblocking(false) {
                    log::warn!("[transport] {} cannot switch {} to blocking: {}", name, peer, e);
                    continue;
                }
                let _ = stream.set_nodelay(true);
                on_accept(index, stream, peer);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("[transport] {} accept failed: {}", name, e);
                return;
            }
        }
    }
}
