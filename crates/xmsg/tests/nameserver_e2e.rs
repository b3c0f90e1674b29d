// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! Name-server handshake over loopback TCP.

use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use xmsg::config::{ERR_BAD_FORMAT, ERR_WRONG_PASSWORD, PROTOCOL_VERSION};
use xmsg::failover::handshake::handshake;
use xmsg::nameserver::{HandshakeReply, HandshakeRequest};
use xmsg::{Error, NameServer, NameServerSettings};

const TIMEOUT: Duration = Duration::from_secs(3);

fn start(password: Option<&str>) -> NameServer {
    let settings = NameServerSettings {
        tcp_port: 0,
        multicast: false,
        password: password.map(str::to_string),
        domain_port: 45000,
        selector_timeout: Duration::from_millis(100),
        ..NameServerSettings::default()
    };
    NameServer::start(settings).unwrap()
}

fn loopback(server: &NameServer) -> SocketAddr {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, server.local_addr().port()).into()
}

fn wait_for(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !done() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_handshake_returns_domain_port() {
    let mut server = start(Some("pw"));
    let port = handshake(loopback(&server), Some("pw"), TIMEOUT).unwrap();
    assert_eq!(port, 45000);

    wait_for(|| server.metrics().snapshot().0 == 1);
    assert_eq!(server.metrics().snapshot(), (1, 0));
    server.stop();
}

#[test]
fn test_open_server_accepts_any_password() {
    let server = start(None);
    assert_eq!(handshake(loopback(&server), Some("anything"), TIMEOUT).unwrap(), 45000);
    assert_eq!(handshake(loopback(&server), None, TIMEOUT).unwrap(), 45000);
}

#[test]
fn test_wrong_password_is_rejected() {
    let server = start(Some("pw"));
    let err = handshake(loopback(&server), Some("nope"), TIMEOUT).unwrap_err();
    match err {
        Error::Rejected { code, .. } => assert_eq!(code, ERR_WRONG_PASSWORD),
        other => panic!("expected a rejection, got {:?}", other),
    }
    assert!(handshake(loopback(&server), None, TIMEOUT).unwrap_err().is_rejection());
}

#[test]
fn test_garbage_gets_bad_format_reply() {
    let server = start(None);
    let mut stream = TcpStream::connect(loopback(&server)).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();

    match HandshakeReply::read(&mut stream).unwrap() {
        HandshakeReply::Rejected { code, message } => {
            assert_eq!(code, ERR_BAD_FORMAT);
            assert!(!message.is_empty());
        }
        other => panic!("expected a rejection, got {:?}", other),
    }
    wait_for(|| server.metrics().snapshot().1 == 1);
    assert_eq!(server.metrics().snapshot().1, 1);
}

#[test]
fn test_version_mismatch_is_rejected() {
    let server = start(None);
    let mut request = HandshakeRequest::new(xmsg::config::KIND_DIRECT_TCP, None);
    request.version = PROTOCOL_VERSION + 1;

    let mut stream = TcpStream::connect(loopback(&server)).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    stream.write_all(&request.encode()).unwrap();
    assert!(matches!(
        HandshakeReply::read(&mut stream).unwrap(),
        HandshakeReply::Rejected { .. }
    ));
}

#[test]
fn test_silent_client_only_delays_others() {
    let server = start(None);
    let _idle = TcpStream::connect(loopback(&server)).unwrap();
    assert_eq!(handshake(loopback(&server), None, TIMEOUT).unwrap(), 45000);
}

#[test]
fn test_invalid_settings_refused() {
    let settings = NameServerSettings {
        tcp_port: 0,
        multicast: false,
        domain_port: 0,
        ..NameServerSettings::default()
    };
    assert!(matches!(NameServer::start(settings), Err(Error::Config(_))));
}
