// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Stateless pub/sub forwarding broker.
//!
//! # Architecture
//!
//! ```text
//!   publishers ---> [P]   pub port     ---+
//!                                         |  prefix routing
//!   subscribers <-- [P+1] sub port     <--+
//!                                         |
//!   drivers    <--> [P+2] control port <--+  CONNECT echoes
//! ```
//!
//! Every link gets a reader thread; subscriber and control links also get a
//! writer thread draining a bounded outbox. A message is forwarded to every
//! subscriber holding a subscription that is a prefix of its topic frame.
//!
//! Control frames `[xmsg:control, tag, arg]` arriving on the publish port are
//! consumed by the proxy itself:
//!
//! - `CONNECT` (`arg` = identity): `[CONNECT, identity]` is sent to the
//!   control link registered under that identity.
//! - `SUBSCRIBE` (`arg` = topic): `[topic, SUBSCRIBE]` is routed like any
//!   message on `topic`, so it reaches exactly the subscribers that would
//!   receive application traffic on it.

use super::acceptor::Acceptor;
use super::frame_codec::{FrameCodec, Frames};
use super::net::bind_listener;
use crate::config::{
    CMD_SUBSCRIBE, CMD_UNSUBSCRIBE, CTRL_CONNECT, CTRL_SUBSCRIBE, CTRL_TOPIC, MAX_PROXY_PORT,
    PROXY_CONTROL_OFFSET, PROXY_SUB_OFFSET,
};
use crate::connection::ProxyAddress;
use crate::context::{Context, SocketLease};
use crate::error::{Error, Result};
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

// ============================================================================
// Constants
// ============================================================================

const PUB_LISTENER: usize = 0;
const SUB_LISTENER: usize = 1;
const CONTROL_LISTENER: usize = 2;

/// Base-port range tried when an ephemeral proxy is requested.
const EPHEMERAL_RANGE: std::ops::Range<u16> = 20000..60000;

/// Attempts at finding three free consecutive ports.
const EPHEMERAL_ATTEMPTS: usize = 32;

// ============================================================================
// Routing state
// ============================================================================

#[derive(Debug)]
struct SubscriberLink {
    peer: SocketAddr,
    subscriptions: Vec<String>,
    outbox: Sender<Frames>,
}

impl SubscriberLink {
    fn matches(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|s| topic.starts_with(s.as_str()))
    }
}

#[derive(Debug, Default)]
struct Links {
    streams: Vec<TcpStream>,
    threads: Vec<JoinHandle<()>>,
}

#[derive(Debug)]
struct ProxyState {
    subscribers: DashMap<u64, SubscriberLink>,
    controls: DashMap<String, Sender<Frames>>,
    links: Mutex<Links>,
    next_id: AtomicU64,
    max_message_size: usize,
    outbox_capacity: usize,
}

impl ProxyState {
    fn track(&self, stream: &TcpStream) {
        match stream.try_clone() {
            Ok(clone) => self.links.lock().streams.push(clone),
            Err(e) => log::warn!("[proxy] cannot track link: {}", e),
        }
    }

    fn spawn<F>(&self, name: String, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        let handle = thread::Builder::new()
            .name(name)
            .spawn(f)
            .expect("failed to spawn proxy thread");
        let mut links = self.links.lock();
        links.threads.retain(|t| !t.is_finished());
        links.threads.push(handle);
    }

    fn on_publish(&self, frames: Frames) {
        if frames.len() == 3 && frames[0] == CTRL_TOPIC.as_bytes() {
            self.on_control(&frames[1], &frames[2]);
            return;
        }
        let topic = String::from_utf8_lossy(&frames[0]).into_owned();
        self.route(&topic, frames);
    }

    fn on_control(&self, tag: &[u8], arg: &[u8]) {
        let arg = String::from_utf8_lossy(arg).into_owned();
        if tag == CTRL_CONNECT.as_bytes() {
            match self.controls.get(&arg) {
                Some(outbox) => {
                    let echo = vec![CTRL_CONNECT.as_bytes().to_vec(), arg.as_bytes().to_vec()];
                    let _ = outbox.try_send(echo);
                }
                None => log::trace!("[proxy] connect probe for unknown identity {}", arg),
            }
        } else if tag == CTRL_SUBSCRIBE.as_bytes() {
            let echo = vec![arg.as_bytes().to_vec(), CTRL_SUBSCRIBE.as_bytes().to_vec()];
            self.route(&arg, echo);
        } else {
            log::warn!(
                "[proxy] unknown control tag {:?}",
                String::from_utf8_lossy(tag)
            );
        }
    }

    fn route(&self, topic: &str, frames: Frames) {
        for link in self.subscribers.iter() {
            if !link.matches(topic) {
                continue;
            }
            if let Err(TrySendError::Full(_)) = link.outbox.try_send(frames.clone()) {
                log::debug!("[proxy] subscriber {} is slow, message dropped", link.peer);
            }
        }
    }

    fn on_command(&self, id: u64, frames: &Frames) {
        if frames.len() != 2 {
            log::warn!("[proxy] malformed subscriber command ({} frames)", frames.len());
            return;
        }
        let topic = String::from_utf8_lossy(&frames[1]).into_owned();
        let Some(mut link) = self.subscribers.get_mut(&id) else {
            return;
        };
        if frames[0] == CMD_SUBSCRIBE.as_bytes() {
            if !link.subscriptions.contains(&topic) {
                log::debug!("[proxy] {} subscribed to {:?}", link.peer, topic);
                link.subscriptions.push(topic);
            }
        } else if frames[0] == CMD_UNSUBSCRIBE.as_bytes() {
            log::debug!("[proxy] {} unsubscribed from {:?}", link.peer, topic);
            link.subscriptions.retain(|s| *s != topic);
        } else {
            log::warn!("[proxy] unknown subscriber command");
        }
    }

    fn shutdown(&self) {
        self.subscribers.clear();
        self.controls.clear();
        let links = std::mem::take(&mut *self.links.lock());
        for stream in &links.streams {
            let _ = stream.shutdown(Shutdown::Both);
        }
        for thread in links.threads {
            let _ = thread.join();
        }
    }
}

// ============================================================================
// Link handlers
// ============================================================================

fn read_loop<F>(state: &ProxyState, mut stream: TcpStream, peer: SocketAddr, mut on_message: F)
where
    F: FnMut(Frames),
{
    let mut codec = FrameCodec::new(state.max_message_size);
    loop {
        match codec.read_message(&mut stream) {
            Ok(frames) => on_message(frames),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                log::debug!("[proxy] link {} read failed: {}", peer, e);
                break;
            }
        }
    }
}

fn write_loop(mut stream: TcpStream, outbox: Receiver<Frames>) {
    for frames in outbox.iter() {
        if stream.write_all(&FrameCodec::encode(&frames)).is_err() {
            break;
        }
    }
}

fn accept_link(state: &Arc<ProxyState>, index: usize, stream: TcpStream, peer: SocketAddr) {
    state.track(&stream);
    match index {
        PUB_LISTENER => {
            let st = Arc::clone(state);
            state.spawn(format!("xmsg-proxy-pub-{}", peer.port()), move || {
                read_loop(&st, stream, peer, |frames| st.on_publish(frames));
            });
        }
        SUB_LISTENER => {
            let writer = match stream.try_clone() {
                Ok(w) => w,
                Err(e) => {
                    log::warn!("[proxy] cannot clone subscriber link {}: {}", peer, e);
                    return;
                }
            };
            let id = state.next_id.fetch_add(1, Ordering::Relaxed);
            let (outbox, rx) = bounded(state.outbox_capacity);
            state.subscribers.insert(
                id,
                SubscriberLink {
                    peer,
                    subscriptions: Vec::new(),
                    outbox,
                },
            );
            state.spawn(format!("xmsg-proxy-out-{}", peer.port()), move || {
                write_loop(writer, rx);
            });
            let st = Arc::clone(state);
            state.spawn(format!("xmsg-proxy-sub-{}", peer.port()), move || {
                read_loop(&st, stream, peer, |frames| st.on_command(id, &frames));
                st.subscribers.remove(&id);
            });
        }
        CONTROL_LISTENER => {
            let st = Arc::clone(state);
            state.spawn(format!("xmsg-proxy-ctl-{}", peer.port()), move || {
                control_link(&st, stream, peer);
            });
        }
        _ => {}
    }
}

fn control_link(state: &Arc<ProxyState>, stream: TcpStream, peer: SocketAddr) {
    let writer = match stream.try_clone() {
        Ok(w) => w,
        Err(e) => {
            log::warn!("[proxy] cannot clone control link {}: {}", peer, e);
            return;
        }
    };
    let mut identity: Option<String> = None;
    read_loop(state, stream, peer, |frames| {
        if identity.is_some() || frames.len() != 1 {
            return;
        }
        let id = String::from_utf8_lossy(&frames[0]).into_owned();
        let (outbox, rx) = bounded(state.outbox_capacity);
        state.controls.insert(id.clone(), outbox);
        if let Ok(w) = writer.try_clone() {
            state.spawn(format!("xmsg-proxy-ctl-out-{}", peer.port()), move || {
                write_loop(w, rx);
            });
        }
        log::trace!("[proxy] control link {} registered as {}", peer, id);
        identity = Some(id);
    });
    if let Some(id) = identity {
        state.controls.remove(&id);
    }
}

fn bind_triplet(ip: IpAddr, port: u16) -> Result<(Vec<TcpListener>, u16)> {
    let bind_at = |base: u16| -> io::Result<Vec<TcpListener>> {
        (0..3u16)
            .map(|offset| bind_listener(SocketAddr::new(ip, base + offset)))
            .collect()
    };

    if port != 0 {
        if port > MAX_PROXY_PORT {
            return Err(Error::Config(format!("proxy port {} leaves no room for P+2", port)));
        }
        return Ok((bind_at(port)?, port));
    }
    for _ in 0..EPHEMERAL_ATTEMPTS {
        let base = fastrand::u16(EPHEMERAL_RANGE);
        match bind_at(base) {
            Ok(listeners) => return Ok((listeners, base)),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::Transport(
        "no three consecutive free ports for the proxy".into(),
    ))
}

// ============================================================================
// Proxy handle
// ============================================================================

/// A running proxy.
#[derive(Debug)]
pub struct Proxy {
    address: ProxyAddress,
    state: Arc<ProxyState>,
    acceptor: Option<Acceptor>,
    _lease: SocketLease,
}

impl Proxy {
    /// Bind the three proxy ports of `address` and start forwarding.
    ///
    /// A publish port of 0 picks a random free base port; the chosen one is
    /// reported by [`Proxy::address`].
    pub fn start(ctx: &Arc<Context>, address: ProxyAddress) -> Result<Self> {
        let lease = ctx.lease()?;
        let ip = address.pub_addr()?.ip();
        let (listeners, base) = bind_triplet(ip, address.pub_port())?;
        let address = ProxyAddress::new(address.host(), base);

        let settings = ctx.settings();
        let state = Arc::new(ProxyState {
            subscribers: DashMap::new(),
            controls: DashMap::new(),
            links: Mutex::new(Links::default()),
            next_id: AtomicU64::new(1),
            max_message_size: settings.max_message_size,
            outbox_capacity: settings.inbox_capacity,
        });

        let st = Arc::clone(&state);
        let acceptor = Acceptor::spawn(
            &format!("xmsg-proxy-{}", base),
            listeners,
            move |index, stream, peer| accept_link(&st, index, stream, peer),
        )?;
        log::info!(
            "[proxy] listening on {} (pub {}, sub {}, control {})",
            ip,
            base,
            base + PROXY_SUB_OFFSET,
            base + PROXY_CONTROL_OFFSET
        );

        Ok(Self {
            address,
            state,
            acceptor: Some(acceptor),
            _lease: lease,
        })
    }

    /// Address clients should connect to.
    pub fn address(&self) -> &ProxyAddress {
        &self.address
    }

    /// Number of connected subscriber links.
    pub fn subscriber_count(&self) -> usize {
        self.state.subscribers.len()
    }

    /// Stop accepting, drop every link and join all threads. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut acceptor) = self.acceptor.take() {
            acceptor.stop();
            self.state.shutdown();
            log::info!("[proxy] {} stopped", self.address);
        }
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.stop();
    }
}
