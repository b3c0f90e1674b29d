// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Direct TCP handshake with a name server.

use crate::config::KIND_DIRECT_TCP;
use crate::error::{Error, Result};
use crate::nameserver::protocol::{HandshakeReply, HandshakeRequest};
use crate::transport::net::connect_stream;
use std::io::Write;
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

/// Ask the name server at `addr` for the proxy port.
///
/// A refusal becomes [`Error::Rejected`] carrying the server's code and
/// message; socket failures stay [`Error::Io`].
pub fn handshake(addr: SocketAddr, password: Option<&str>, timeout: Duration) -> Result<u16> {
    let mut stream = connect_stream(addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let request = HandshakeRequest::new(KIND_DIRECT_TCP, password);
    stream.write_all(&request.encode())?;
    stream.flush()?;

    let reply = HandshakeReply::read(&mut stream);
    let _ = stream.shutdown(Shutdown::Both);
    match reply? {
        HandshakeReply::Accepted { domain_port } => {
            log::debug!("[failover] {} advertises domain port {}", addr, domain_port);
            Ok(domain_port)
        }
        HandshakeReply::Rejected { code, message } => Err(Error::Rejected { code, message }),
    }
}
