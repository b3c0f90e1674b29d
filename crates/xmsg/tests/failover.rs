// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! Connector failover across a UDL list.

use parking_lot::Mutex;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use xmsg::config::{ConnectionSetup, DiscoverySettings};
use xmsg::failover::{Phase, ServerLocation};
use xmsg::udl::ParsedUdl;
use xmsg::{
    Connector, Context, Dialer, Error, NameServer, NameServerSettings, NetDialer, Proxy,
    ProxyAddress, Result,
};

/// Dialer that fails on the hosts it is told to and logs every attempt.
#[derive(Default)]
struct Recording {
    failing: Vec<String>,
    attempts: Mutex<Vec<String>>,
}

impl Dialer for Recording {
    type Session = String;

    fn discover(&self, _udl: &ParsedUdl) -> Result<ServerLocation> {
        Err(Error::Unsupported("no multicast here".into()))
    }

    fn handshake(&self, host: &str, port: u16, _udl: &ParsedUdl) -> Result<u16> {
        self.attempts.lock().push(host.to_string());
        if self.failing.iter().any(|h| h == host) {
            return Err(Error::Timeout(format!("{}:{} unreachable", host, port)));
        }
        Ok(port + 1)
    }

    fn establish(&self, host: &str, port: u16, _udl: &ParsedUdl) -> Result<String> {
        Ok(format!("{}:{}", host, port))
    }
}

/// Dialer whose handshake takes a while.
struct Sluggish(Duration);

impl Dialer for Sluggish {
    type Session = String;

    fn discover(&self, _udl: &ParsedUdl) -> Result<ServerLocation> {
        Err(Error::Unsupported("no multicast here".into()))
    }

    fn handshake(&self, _host: &str, port: u16, _udl: &ParsedUdl) -> Result<u16> {
        thread::sleep(self.0);
        Ok(port + 1)
    }

    fn establish(&self, host: &str, port: u16, _udl: &ParsedUdl) -> Result<String> {
        Ok(format!("{}:{}", host, port))
    }
}

fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

struct Fabric {
    _proxy: Proxy,
    proxy_port: u16,
    server: NameServer,
    ctx: Arc<Context>,
}

fn fabric(password: &str, domain_port: Option<u16>) -> Fabric {
    let ctx = Context::new();
    let proxy = Proxy::start(&ctx, ProxyAddress::new("127.0.0.1", 0)).unwrap();
    let proxy_port = proxy.address().pub_port();
    let server = NameServer::start(NameServerSettings {
        tcp_port: 0,
        multicast: false,
        password: Some(password.to_string()),
        domain_port: domain_port.unwrap_or(proxy_port),
        selector_timeout: Duration::from_millis(100),
        ..NameServerSettings::default()
    })
    .unwrap();
    Fabric {
        _proxy: proxy,
        proxy_port,
        server,
        ctx,
    }
}

fn dialer(ctx: &Arc<Context>) -> NetDialer {
    NetDialer::new(Arc::clone(ctx))
        .with_setup(ConnectionSetup::default().with_connection_timeout(Duration::from_secs(2)))
        .with_discovery(DiscoverySettings::default())
        .with_handshake_timeout(Duration::from_secs(1))
}

#[test]
fn test_failing_candidate_tried_once_per_connect() {
    let recording = Recording {
        failing: vec!["a.example".into()],
        ..Recording::default()
    };
    let udl = "cMsg://a.example:5000/cMsg/x;cMsg://b.example:5000/cMsg/x;cMsg://c.example:5000/cMsg/x";
    let connector = Connector::with_udl(recording, udl).unwrap();

    connector.connect().unwrap();
    assert_eq!(connector.current_index(), Some(1));
    assert_eq!(connector.with_session(String::clone).unwrap(), "b.example:5001");
    assert_eq!(*connector.dialer().attempts.lock(), vec!["a.example", "b.example"]);

    // reconnecting moves on from the active candidate
    connector.connect().unwrap();
    assert_eq!(connector.current_index(), Some(2));
    assert_eq!(
        *connector.dialer().attempts.lock(),
        vec!["a.example", "b.example", "c.example"]
    );
}

#[test]
fn test_every_candidate_failing() {
    let recording = Recording {
        failing: vec!["a.example".into(), "b.example".into()],
        ..Recording::default()
    };
    let connector =
        Connector::with_udl(recording, "cMsg://a.example/cMsg/x;cMsg://b.example/cMsg/x").unwrap();

    match connector.connect().unwrap_err() {
        Error::ConnectFailed { attempts, source } => {
            assert_eq!(attempts, 2);
            assert!(source.to_string().contains("b.example"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(connector.phase(), Phase::Parsed);
    assert!(!connector.is_connected());
    assert_eq!(connector.dialer().attempts.lock().len(), 2);
}

#[test]
fn test_dead_server_skipped_for_live_one() {
    let fabric = fabric("pw", None);
    let udl = format!(
        "cMsg://127.0.0.1:{}/cMsg/a?cmsgpassword=pw;cMsg://127.0.0.1:{}/cMsg/b?cmsgpassword=pw",
        dead_port(),
        fabric.server.local_addr().port()
    );
    let connector = Connector::with_udl(dialer(&fabric.ctx), &udl).unwrap();

    connector.connect().unwrap();
    assert_eq!(connector.phase(), Phase::Connected);
    assert_eq!(connector.current_index(), Some(1));
    let port = connector.with_session(|s| s.address().pub_port());
    assert_eq!(port, Some(fabric.proxy_port));

    connector.disconnect();
    assert!(!connector.is_connected());
    assert_eq!(connector.current_index(), Some(1));
}

#[test]
fn test_wrong_password_fails_connect() {
    let fabric = fabric("pw", None);
    let udl = format!(
        "cMsg://127.0.0.1:{}/cMsg/a?cmsgpassword=wrong",
        fabric.server.local_addr().port()
    );
    let connector = Connector::with_udl(dialer(&fabric.ctx), &udl).unwrap();

    match connector.connect().unwrap_err() {
        Error::ConnectFailed { source, .. } => assert!(source.is_rejection(), "got {:?}", source),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_domain_port_in_udl_wins() {
    // the server advertises a port nothing listens on
    let mut fabric = fabric("pw", Some(dead_port()));
    let udl = format!(
        "cMsg://127.0.0.1:{}/cMsg/a?cmsgpassword=pw&domainPort={}",
        fabric.server.local_addr().port(),
        fabric.proxy_port
    );
    let connector = Connector::with_udl(dialer(&fabric.ctx), &udl).unwrap();

    connector.connect().unwrap();
    assert_eq!(
        connector.with_session(|s| s.address().pub_port()),
        Some(fabric.proxy_port)
    );
    connector.disconnect();
    fabric.server.stop();
}

#[test]
fn test_phase_visible_during_slow_handshake() {
    let connector = Arc::new(
        Connector::with_udl(Sluggish(Duration::from_secs(2)), "cMsg://a.example:5000/cMsg/x")
            .unwrap(),
    );
    let worker = {
        let connector = Arc::clone(&connector);
        thread::spawn(move || connector.connect())
    };

    let deadline = Instant::now() + Duration::from_secs(1);
    while connector.phase() != Phase::Connecting && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    let asked = Instant::now();
    assert_eq!(connector.phase(), Phase::Connecting);
    assert!(!connector.is_connected());
    assert!(asked.elapsed() < Duration::from_millis(200));

    worker.join().unwrap().unwrap();
    assert_eq!(connector.phase(), Phase::Connected);
    assert_eq!(connector.with_session(String::clone).unwrap(), "a.example:5001");
}
