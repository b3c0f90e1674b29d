// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Strict request/reply sockets.
//!
//! A [`ReqSocket`] has at most one request in flight: it writes the request
//! and blocks until the reply arrives or the timeout elapses. A
//! [`RepSocket`] accepts any number of requesters and funnels their requests
//! into a single queue, so one consumer thread serves them in arrival order.

use super::acceptor::Acceptor;
use super::frame_codec::{FrameCodec, Frames};
use super::net::{bind_listener, connect_stream};
use crate::context::SocketLease;
use crate::error::{Error, Result};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

// ============================================================================
// Request socket
// ============================================================================

/// Client side of a request/reply exchange.
///
/// The link is opened lazily and dropped after any failure, so the next
/// request starts on a fresh connection with no stale reply pending.
#[derive(Debug)]
pub struct ReqSocket {
    addr: SocketAddr,
    stream: Mutex<Option<TcpStream>>,
    closed: AtomicBool,
    lease: SocketLease,
}

impl ReqSocket {
    pub(crate) fn new(lease: SocketLease, addr: SocketAddr) -> Self {
        Self {
            addr,
            stream: Mutex::new(None),
            closed: AtomicBool::new(false),
            lease,
        }
    }

    /// Address of the reply server.
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send `frames` and wait up to `timeout` for the reply.
    pub fn request<F: AsRef<[u8]>>(&self, frames: &[F], timeout: Duration) -> Result<Frames> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed("req socket"));
        }
        let mut guard = self.stream.lock();
        if guard.is_none() {
            let timeout = self.lease.settings().connect_timeout;
            *guard = Some(connect_stream(self.addr, timeout)?);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(Error::Closed("req socket"));
        };

        let result = exchange(stream, frames, timeout, self.lease.settings().max_message_size);
        if result.is_err() {
            if let Some(stream) = guard.take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        result.map_err(|e| match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout(format!(
                "no reply from {} within {:?}",
                self.addr, timeout
            )),
            _ => Error::Io(e),
        })
    }

    /// Drop the link. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Some(stream) = self.stream.lock().take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }
}

fn exchange<F: AsRef<[u8]>>(
    stream: &mut TcpStream,
    frames: &[F],
    timeout: Duration,
    max_size: usize,
) -> io::Result<Frames> {
    stream.set_write_timeout(Some(timeout))?;
    stream.write_all(&FrameCodec::encode(frames))?;
    stream.set_read_timeout(Some(timeout))?;
    FrameCodec::new(max_size).read_message(stream)
}

// ============================================================================
// Reply socket
// ============================================================================

/// One request received by a [`RepSocket`].
#[derive(Debug)]
pub struct Request {
    frames: Frames,
    peer: SocketAddr,
    replier: Arc<Mutex<TcpStream>>,
}

impl Request {
    /// Request frames.
    pub fn frames(&self) -> &Frames {
        &self.frames
    }

    /// Address of the requester.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send the reply back to the requester.
    pub fn reply<F: AsRef<[u8]>>(&self, frames: &[F]) -> Result<()> {
        self.replier
            .lock()
            .write_all(&FrameCodec::encode(frames))
            .map_err(Error::from)
    }
}

#[derive(Debug, Default)]
struct Peers {
    streams: Vec<TcpStream>,
    readers: Vec<JoinHandle<()>>,
}

/// Server side of a request/reply exchange.
#[derive(Debug)]
pub struct RepSocket {
    local_addr: SocketAddr,
    requests: Receiver<Request>,
    acceptor: Mutex<Option<Acceptor>>,
    peers: Arc<Mutex<Peers>>,
    closed: AtomicBool,
    _lease: SocketLease,
}

impl RepSocket {
    pub(crate) fn bind(lease: SocketLease, addr: SocketAddr) -> Result<Self> {
        let settings = lease.settings();
        let listener = bind_listener(addr)?;
        let local_addr = listener.local_addr()?;
        let (tx, requests) = bounded(settings.inbox_capacity);
        let peers = Arc::new(Mutex::new(Peers::default()));
        let max_size = settings.max_message_size;

        let peers_clone = Arc::clone(&peers);
        let acceptor = Acceptor::spawn(
            &format!("xmsg-rep-{}", local_addr.port()),
            vec![listener],
            move |_, stream, peer| {
                attach_requester(&peers_clone, stream, peer, max_size, tx.clone());
            },
        )?;
        log::debug!("[transport] rep socket bound to {}", local_addr);

        Ok(Self {
            local_addr,
            requests,
            acceptor: Mutex::new(Some(acceptor)),
            peers,
            closed: AtomicBool::new(false),
            _lease: lease,
        })
    }

    /// Bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait up to `timeout` for the next request. `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Request>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed("rep socket"));
        }
        match self.requests.recv_timeout(timeout) {
            Ok(request) => Ok(Some(request)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Closed("rep socket")),
        }
    }

    /// Stop accepting, drop every requester and join their readers.
    /// Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(mut acceptor) = self.acceptor.lock().take() {
            acceptor.stop();
        }
        let peers = std::mem::take(&mut *self.peers.lock());
        for stream in &peers.streams {
            let _ = stream.shutdown(Shutdown::Both);
        }
        for reader in peers.readers {
            let _ = reader.join();
        }
    }
}

impl Drop for RepSocket {
    fn drop(&mut self) {
        self.close();
    }
}

fn attach_requester(
    peers: &Mutex<Peers>,
    stream: TcpStream,
    peer: SocketAddr,
    max_size: usize,
    tx: Sender<Request>,
) {
    let (reader_stream, shutdown_handle) = match (stream.try_clone(), stream.try_clone()) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) | (_, Err(e)) => {
            log::warn!("[transport] cannot clone requester link {}: {}", peer, e);
            return;
        }
    };
    let replier = Arc::new(Mutex::new(stream));

    #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
    let reader = thread::Builder::new()
        .name(format!("xmsg-rep-peer-{}", peer.port()))
        .spawn(move || {
            let mut stream = reader_stream;
            let mut codec = FrameCodec::new(max_size);
            loop {
                match codec.read_message(&mut stream) {
                    Ok(frames) => {
                        let request = Request {
                            frames,
                            peer,
                            replier: Arc::clone(&replier),
                        };
                        if tx.send(request).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::trace!("[transport] requester {} gone: {}", peer, e);
                        break;
                    }
                }
            }
        })
        .expect("failed to spawn requester thread");

    let mut peers = peers.lock();
    peers.readers.retain(|r| !r.is_finished());
    peers.readers.push(reader);
    peers.streams.push(shutdown_handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn test_request_reply() {
        let ctx = Context::new();
        let rep = ctx.rep_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        let req = ctx.req_socket(rep.local_addr()).unwrap();

        let server = thread::spawn(move || {
            let request = loop {
                if let Some(r) = rep.recv_timeout(Duration::from_millis(100)).unwrap() {
                    break r;
                }
            };
            let mut reply = request.frames().clone();
            reply.push(b"pong".to_vec());
            request.reply(&reply).unwrap();
            rep
        });

        let reply = req.request(&[b"ping".as_slice()], Duration::from_secs(2)).unwrap();
        assert_eq!(reply, vec![b"ping".to_vec(), b"pong".to_vec()]);
        let rep = server.join().unwrap();
        rep.close();
        assert!(matches!(
            rep.recv_timeout(Duration::from_millis(1)),
            Err(Error::Closed(_))
        ));
    }

    #[test]
    fn test_request_timeout() {
        let ctx = Context::new();
        let rep = ctx.rep_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        let req = ctx.req_socket(rep.local_addr()).unwrap();
        let err = req
            .request(&[b"nobody".as_slice()], Duration::from_millis(200))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
