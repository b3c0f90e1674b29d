// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Connect/failover state machine.
//!
//! ```text
//!   Unparsed --set_udl--> Parsed --connect--> Connecting --ok--> Connected
//!                           ^                     |                  |
//!                           +-----all failed------+                  |
//!                           +--------------disconnect----------------+
//! ```
//!
//! Candidates, the active index and the session live under one lock. A
//! connect attempt dials from a snapshot of the candidates with the lock
//! released, then commits under the lock. When the list was replaced in the
//! meantime the new session follows its candidate into the new list, and a
//! disconnect issued mid-attempt discards it.

use crate::error::{Error, Result};
use crate::netif;
use crate::udl::{parse_udl_list, ParsedUdl};
use parking_lot::Mutex;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use super::subnet::order_addresses;

/// Where a connector stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No candidate list yet.
    Unparsed,
    /// Candidates known, no session.
    Parsed,
    /// A connect attempt is running.
    Connecting,
    /// A session is open.
    Connected,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Unparsed => "unparsed",
            Phase::Parsed => "parsed",
            Phase::Connecting => "connecting",
            Phase::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Outcome of multicast discovery: where the name server listens and the
/// `(ip, broadcast)` pairs it is reachable on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLocation {
    /// Name-server TCP port.
    pub tcp_port: u16,
    /// `(ip, broadcast)` pairs.
    pub addresses: Vec<(String, String)>,
}

/// Network operations used by a [`Connector`].
///
/// Splitting them lets tests script failures without sockets.
pub trait Dialer: Send + Sync {
    /// Open session type.
    type Session: Send;

    /// Locate a name server by multicast discovery.
    fn discover(&self, udl: &ParsedUdl) -> Result<ServerLocation>;

    /// TCP handshake with the name server at `host:port`; returns the
    /// advertised proxy port.
    fn handshake(&self, host: &str, port: u16, udl: &ParsedUdl) -> Result<u16>;

    /// Open the session on the proxy at `host:port`.
    fn establish(&self, host: &str, port: u16, udl: &ParsedUdl) -> Result<Self::Session>;
}

struct State<S> {
    candidates: Vec<ParsedUdl>,
    current: Option<usize>,
    session: Option<S>,
    phase: Phase,
    /// Bumped on every candidate list replacement.
    generation: u64,
    /// Bumped when a connect attempt starts and on disconnect.
    attempt: u64,
}

/// Failover-aware connection to one of several servers.
pub struct Connector<D: Dialer> {
    dialer: D,
    state: Mutex<State<D::Session>>,
}

impl<D: Dialer> fmt::Debug for Connector<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Connector")
            .field("candidates", &state.candidates.len())
            .field("current", &state.current)
            .field("phase", &state.phase)
            .finish()
    }
}

impl<D: Dialer> Connector<D> {
    /// Connector with no candidates.
    pub fn new(dialer: D) -> Self {
        Self {
            dialer,
            state: Mutex::new(State {
                candidates: Vec::new(),
                current: None,
                session: None,
                phase: Phase::Unparsed,
                generation: 0,
                attempt: 0,
            }),
        }
    }

    /// Connector over a `;`-separated UDL list.
    pub fn with_udl(dialer: D, udl: &str) -> Result<Self> {
        let connector = Self::new(dialer);
        connector.set_udl(udl)?;
        Ok(connector)
    }

    /// The dialer.
    pub fn dialer(&self) -> &D {
        &self.dialer
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// True while a session is open.
    pub fn is_connected(&self) -> bool {
        self.state.lock().session.is_some()
    }

    /// Index of the active candidate.
    pub fn current_index(&self) -> Option<usize> {
        self.state.lock().current
    }

    /// Copy of the candidate list.
    pub fn candidates(&self) -> Vec<ParsedUdl> {
        self.state.lock().candidates.clone()
    }

    /// Replace the candidate list.
    ///
    /// The whole list is parsed first; on error the current list stays
    /// untouched. A live session is kept and the active index follows its
    /// candidate into the new list (cleared when absent).
    pub fn set_udl(&self, udl: &str) -> Result<()> {
        let candidates = parse_udl_list(udl)?;
        let mut state = self.state.lock();
        let active = state
            .current
            .and_then(|i| state.candidates.get(i))
            .map(|c| c.udl.clone());
        let current = match (state.session.is_some(), active) {
            (true, Some(active)) => candidates.iter().position(|c| c.udl == active),
            _ => None,
        };
        state.current = current;
        state.candidates = candidates;
        state.generation = state.generation.wrapping_add(1);
        if state.phase == Phase::Unparsed {
            state.phase = Phase::Parsed;
        }
        log::debug!(
            "[failover] {} candidate(s), active index {:?}",
            state.candidates.len(),
            state.current
        );
        Ok(())
    }

    /// Connect to the first candidate that accepts.
    ///
    /// Candidates are tried once each, starting after the active one. When
    /// already connected to the first candidate of a non-multicast
    /// configuration this returns immediately. Only one attempt runs at a
    /// time; the accessors stay responsive while it dials.
    pub fn connect(&self) -> Result<()> {
        let (candidates, start, generation, attempt, previous) = {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Unparsed => return Err(Error::InvalidState("no UDL set".into())),
                Phase::Connecting => {
                    return Err(Error::InvalidState("connect already in progress".into()))
                }
                Phase::Parsed | Phase::Connected => {}
            }
            if state.session.is_some()
                && state.current == Some(0)
                && !state.candidates.iter().any(|c| c.must_multicast)
            {
                return Ok(());
            }

            // reconnecting starts from a clean slate
            let previous = state.session.take();
            state.phase = Phase::Connecting;
            state.attempt = state.attempt.wrapping_add(1);
            let total = state.candidates.len();
            let start = state.current.map_or(0, |i| (i + 1) % total);
            (
                state.candidates.clone(),
                start,
                state.generation,
                state.attempt,
                previous,
            )
        };
        drop(previous);

        let total = candidates.len();
        let mut last_error = None;
        for offset in 0..total {
            let index = (start + offset) % total;
            let candidate = &candidates[index];
            match self.try_candidate(candidate) {
                Ok(session) => {
                    return self.commit(session, candidate, index, (generation, attempt))
                }
                Err(e) => {
                    if e.is_rejection() {
                        log::warn!("[failover] {} refused: {}", candidate, e);
                    } else {
                        log::debug!("[failover] {} failed: {}", candidate, e);
                    }
                    last_error = Some(e);
                }
            }
        }

        let mut state = self.state.lock();
        if state.attempt == attempt {
            state.phase = Phase::Parsed;
        }
        Err(Error::ConnectFailed {
            attempts: total,
            source: Box::new(
                last_error.unwrap_or_else(|| Error::InvalidState("empty candidate list".into())),
            ),
        })
    }

    /// Install a freshly opened session unless the attempt went stale.
    fn commit(
        &self,
        session: D::Session,
        candidate: &ParsedUdl,
        index: usize,
        (generation, attempt): (u64, u64),
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.attempt != attempt {
            drop(state);
            drop(session);
            log::debug!("[failover] disconnected while connecting to {}", candidate);
            return Err(Error::Closed("connector disconnected during connect"));
        }
        let current = if state.generation == generation {
            Some(index)
        } else {
            let moved = state.candidates.iter().position(|c| c.udl == candidate.udl);
            log::debug!(
                "[failover] candidates replaced while connecting, {} now at {:?}",
                candidate,
                moved
            );
            moved
        };
        log::info!("[failover] connected through {}", candidate);
        state.session = Some(session);
        state.current = current;
        state.phase = Phase::Connected;
        Ok(())
    }

    fn try_candidate(&self, udl: &ParsedUdl) -> Result<D::Session> {
        if !udl.must_multicast {
            return self.try_host(&udl.host, udl.tcp_port, udl);
        }

        let location = self.dialer.discover(udl)?;
        let hosts = order_addresses(&location.addresses, udl.subnet, &netif::interfaces());
        let mut last_error = Error::Protocol("multicast reply listed no usable address".into());
        for host in hosts {
            match self.try_host(&host.to_string(), location.tcp_port, udl) {
                Ok(session) => return Ok(session),
                Err(e) if e.is_rejection() => return Err(e),
                Err(e) => {
                    log::debug!("[failover] {} via {} failed: {}", udl, host, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    fn try_host(&self, host: &str, port: u16, udl: &ParsedUdl) -> Result<D::Session> {
        let advertised = self.dialer.handshake(host, port, udl)?;
        let domain_port = udl.domain_port.unwrap_or(advertised);
        self.dialer.establish(host, domain_port, udl)
    }

    /// Run `f` on the open session.
    pub fn with_session<R>(&self, f: impl FnOnce(&D::Session) -> R) -> Option<R> {
        self.state.lock().session.as_ref().map(f)
    }

    /// Drop the session. The active index is kept for the next connect.
    ///
    /// An attempt still dialing discards whatever it opens.
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        let session = state.session.take();
        state.attempt = state.attempt.wrapping_add(1);
        if matches!(state.phase, Phase::Connected | Phase::Connecting) {
            state.phase = Phase::Parsed;
        }
        drop(state);
        if session.is_some() {
            log::debug!("[failover] disconnected");
        }
    }
}

/// Multicast target of a parsed UDL.
pub(crate) fn multicast_target(udl: &ParsedUdl) -> Result<SocketAddrV4> {
    let group: Ipv4Addr = udl
        .host
        .parse()
        .map_err(|_| Error::InvalidUdl(format!("multicast host {:?} is not an address", udl.host)))?;
    Ok(SocketAddrV4::new(group, udl.udp_port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{bounded, Receiver, Sender};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Records calls; hosts in `refuse` fail the handshake.
    #[derive(Default)]
    struct Scripted {
        refuse: HashSet<String>,
        handshakes: Mutex<Vec<String>>,
        discoveries: AtomicUsize,
    }

    impl Dialer for Scripted {
        type Session = String;

        fn discover(&self, _udl: &ParsedUdl) -> Result<ServerLocation> {
            self.discoveries.fetch_add(1, Ordering::Relaxed);
            Ok(ServerLocation {
                tcp_port: 45000,
                addresses: vec![
                    ("10.9.9.9".into(), "10.9.9.255".into()),
                    ("10.9.9.10".into(), "10.9.9.255".into()),
                ],
            })
        }

        fn handshake(&self, host: &str, _port: u16, _udl: &ParsedUdl) -> Result<u16> {
            self.handshakes.lock().push(host.to_string());
            if self.refuse.contains(host) {
                return Err(Error::Timeout(format!("{} is down", host)));
            }
            Ok(7771)
        }

        fn establish(&self, host: &str, port: u16, _udl: &ParsedUdl) -> Result<String> {
            Ok(format!("{}:{}", host, port))
        }
    }

    /// Handshake announces itself on `entered` and blocks until `release`.
    struct Gated {
        entered: Sender<String>,
        release: Receiver<()>,
    }

    impl Dialer for Gated {
        type Session = String;

        fn discover(&self, _udl: &ParsedUdl) -> Result<ServerLocation> {
            Err(Error::Unsupported("no multicast".into()))
        }

        fn handshake(&self, host: &str, _port: u16, _udl: &ParsedUdl) -> Result<u16> {
            let _ = self.entered.send(host.to_string());
            self.release
                .recv_timeout(Duration::from_secs(10))
                .map_err(|_| Error::Timeout(format!("{} never released", host)))?;
            Ok(7771)
        }

        fn establish(&self, host: &str, port: u16, _udl: &ParsedUdl) -> Result<String> {
            Ok(format!("{}:{}", host, port))
        }
    }

    /// Connector whose first handshake is in flight on another thread.
    fn dialing(
        udl: &str,
    ) -> (
        Arc<Connector<Gated>>,
        Sender<()>,
        thread::JoinHandle<Result<()>>,
    ) {
        let (entered_tx, entered_rx) = bounded(4);
        let (release_tx, release_rx) = bounded(4);
        let dialer = Gated {
            entered: entered_tx,
            release: release_rx,
        };
        let connector = Arc::new(Connector::with_udl(dialer, udl).unwrap());
        let worker = {
            let connector = Arc::clone(&connector);
            thread::spawn(move || connector.connect())
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        (connector, release_tx, worker)
    }

    fn refusing(hosts: &[&str]) -> Scripted {
        Scripted {
            refuse: hosts.iter().map(|h| h.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_connect_requires_udl() {
        let connector = Connector::new(Scripted::default());
        assert_eq!(connector.phase(), Phase::Unparsed);
        assert!(matches!(connector.connect(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_fast_path_skips_network() {
        let connector = Connector::with_udl(Scripted::default(), "cMsg://a/cMsg;cMsg://b/cMsg").unwrap();
        connector.connect().unwrap();
        connector.connect().unwrap();
        connector.connect().unwrap();
        assert_eq!(connector.dialer().handshakes.lock().len(), 1);
        assert_eq!(connector.phase(), Phase::Connected);
    }

    #[test]
    fn test_domain_port_override() {
        let connector = Connector::with_udl(Scripted::default(), "cMsg://a/cMsg?domainPort=9100").unwrap();
        connector.connect().unwrap();
        assert_eq!(connector.with_session(Clone::clone).unwrap(), "a:9100");
    }

    #[test]
    fn test_all_fail_keeps_last_error() {
        let connector =
            Connector::with_udl(refusing(&["a", "b"]), "cMsg://a/cMsg;cMsg://b/cMsg").unwrap();
        match connector.connect() {
            Err(Error::ConnectFailed { attempts, source }) => {
                assert_eq!(attempts, 2);
                assert!(source.to_string().contains("b is down"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(connector.phase(), Phase::Parsed);
        assert!(!connector.is_connected());
    }

    #[test]
    fn test_bad_list_leaves_candidates_untouched() {
        let connector = Connector::with_udl(Scripted::default(), "cMsg://a/cMsg").unwrap();
        assert!(connector.set_udl("cMsg://b/cMsg;cMsg://c:1/cMsg").is_err());
        let hosts: Vec<_> = connector.candidates().into_iter().map(|c| c.host).collect();
        assert_eq!(hosts, vec!["a"]);
    }

    #[test]
    fn test_set_udl_repoints_index() {
        let connector =
            Connector::with_udl(refusing(&["a"]), "cMsg://a/cMsg;cMsg://b/cMsg").unwrap();
        connector.connect().unwrap();
        assert_eq!(connector.current_index(), Some(1));

        connector.set_udl("cMsg://c/cMsg;cMsg://d/cMsg;cMsg://b/cMsg").unwrap();
        assert_eq!(connector.current_index(), Some(2));
        assert!(connector.is_connected());

        connector.set_udl("cMsg://c/cMsg").unwrap();
        assert_eq!(connector.current_index(), None);
        assert!(connector.is_connected());
    }

    #[test]
    fn test_multicast_tries_discovered_addresses() {
        let connector = Connector::with_udl(refusing(&["10.9.9.9"]), "cMsg://multicast/cMsg").unwrap();
        connector.connect().unwrap();
        assert_eq!(connector.dialer().discoveries.load(Ordering::Relaxed), 1);
        assert_eq!(
            *connector.dialer().handshakes.lock(),
            vec!["10.9.9.9".to_string(), "10.9.9.10".to_string()]
        );
        assert_eq!(connector.with_session(Clone::clone).unwrap(), "10.9.9.10:7771");

        // multicast configurations never take the fast path
        connector.connect().unwrap();
        assert_eq!(connector.dialer().discoveries.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_accessors_answer_while_dialing() {
        let (connector, release, worker) = dialing("cMsg://a/cMsg;cMsg://b/cMsg");

        let asked = Instant::now();
        assert_eq!(connector.phase(), Phase::Connecting);
        assert!(!connector.is_connected());
        assert_eq!(connector.current_index(), None);
        assert_eq!(connector.candidates().len(), 2);
        assert!(asked.elapsed() < Duration::from_millis(500));

        // a second attempt does not queue behind the first
        assert!(matches!(connector.connect(), Err(Error::InvalidState(_))));

        release.send(()).unwrap();
        worker.join().unwrap().unwrap();
        assert_eq!(connector.phase(), Phase::Connected);
        assert_eq!(connector.current_index(), Some(0));
        assert_eq!(connector.with_session(String::clone).unwrap(), "a:7771");
    }

    #[test]
    fn test_list_replaced_while_dialing() {
        let (connector, release, worker) = dialing("cMsg://a/cMsg;cMsg://b/cMsg");
        connector.set_udl("cMsg://c/cMsg;cMsg://a/cMsg").unwrap();
        assert_eq!(connector.phase(), Phase::Connecting);

        release.send(()).unwrap();
        worker.join().unwrap().unwrap();
        assert_eq!(connector.current_index(), Some(1));
        assert_eq!(connector.with_session(String::clone).unwrap(), "a:7771");
    }

    #[test]
    fn test_disconnect_while_dialing_discards_session() {
        let (connector, release, worker) = dialing("cMsg://a/cMsg");
        connector.disconnect();
        assert_eq!(connector.phase(), Phase::Parsed);

        release.send(()).unwrap();
        assert!(matches!(worker.join().unwrap(), Err(Error::Closed(_))));
        assert!(!connector.is_connected());
        assert_eq!(connector.phase(), Phase::Parsed);
    }

    #[test]
    fn test_multicast_target() {
        let udl = ParsedUdl::parse("cMsg://multicast:46000/cMsg").unwrap();
        assert_eq!(
            multicast_target(&udl).unwrap(),
            SocketAddrV4::new(Ipv4Addr::new(239, 220, 0, 0), 46000)
        );
    }
}
