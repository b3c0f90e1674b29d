// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Per-connection handshake worker.

use super::protocol::{HandshakeReply, HandshakeRequest};
use crate::config::{
    ERR_BAD_ARGUMENT, ERR_BAD_FORMAT, ERR_DIFFERENT_VERSION, ERR_WRONG_PASSWORD, KIND_DIRECT_TCP,
    PROTOCOL_VERSION,
};
use crate::error::Error;
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// What a worker needs to validate a client.
#[derive(Debug, Clone)]
pub(crate) struct WorkerPolicy {
    pub password: Option<String>,
    pub domain_port: u16,
    pub timeout: Duration,
}

impl WorkerPolicy {
    /// Decide the reply to `request`.
    pub(crate) fn evaluate(&self, request: &HandshakeRequest) -> HandshakeReply {
        if request.version != PROTOCOL_VERSION {
            return rejected(
                ERR_DIFFERENT_VERSION,
                format!(
                    "client version {} does not match server version {}",
                    request.version, PROTOCOL_VERSION
                ),
            );
        }
        if request.kind != KIND_DIRECT_TCP {
            return rejected(ERR_BAD_ARGUMENT, format!("unexpected message kind {}", request.kind));
        }
        if let Some(password) = &self.password {
            if *password != request.password {
                return rejected(ERR_WRONG_PASSWORD, "wrong password".into());
            }
        }
        HandshakeReply::Accepted {
            domain_port: self.domain_port,
        }
    }
}

fn rejected(code: i32, message: String) -> HandshakeReply {
    HandshakeReply::Rejected { code, message }
}

/// Serve one client whose magic prefix was already consumed, then close.
pub(crate) fn serve_client(mut stream: TcpStream, policy: &WorkerPolicy) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".into());
    if let Err(e) = stream
        .set_read_timeout(Some(policy.timeout))
        .and_then(|()| stream.set_write_timeout(Some(policy.timeout)))
    {
        log::debug!("[nameserver] cannot set timeouts for {}: {}", peer, e);
    }

    let reply = match HandshakeRequest::read_body(&mut stream) {
        Ok(request) => policy.evaluate(&request),
        Err(Error::Io(e)) => {
            log::debug!("[nameserver] {} vanished mid-request: {}", peer, e);
            return;
        }
        Err(e) => rejected(ERR_BAD_FORMAT, e.to_string()),
    };

    match &reply {
        HandshakeReply::Accepted { .. } => log::debug!("[nameserver] accepted {}", peer),
        HandshakeReply::Rejected { code, message } => {
            log::warn!("[nameserver] rejected {} (code {}): {}", peer, code, message)
        }
    }
    if let Err(e) = stream.write_all(&reply.encode()).and_then(|()| stream.flush()) {
        log::debug!("[nameserver] reply to {} lost: {}", peer, e);
    }
    let _ = stream.shutdown(Shutdown::Both);
}
