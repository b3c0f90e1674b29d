// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Name-server wire format. Every integer is a big-endian `i32`.
//!
//! ```text
//! request:         magic[3] | version | kind | pw_len | password
//! reply (ok):      REPLY_OK | domain_port
//! reply (error):   code | msg_len | message (UTF-8)
//! multicast reply: magic[3] | tcp_port | udp_port | count | {ip_len ip brd_len brd} * count
//! ```

use crate::config::{
    MAGIC, MAGIC_LEN, MAX_PASSWORD_LEN, MAX_PROXY_PORT, MAX_REPLY_MESSAGE_LEN,
    MIN_MULTICAST_REPLY_LEN, PROTOCOL_VERSION, REPLY_OK,
};
use crate::error::{Error, Result};
use std::io::{self, Read};

/// Discovery or connection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Protocol version of the client.
    pub version: i32,
    /// Message kind ([`crate::config::KIND_MULTICAST`] or
    /// [`crate::config::KIND_DIRECT_TCP`]).
    pub kind: i32,
    /// Password, empty when none.
    pub password: String,
}

impl HandshakeRequest {
    /// Request of `kind` at the current protocol version.
    pub fn new(kind: i32, password: Option<&str>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind,
            password: password.unwrap_or_default().to_string(),
        }
    }

    /// Encode with the magic prefix.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAGIC_LEN + 12 + self.password.len());
        put_magic(&mut buf);
        put_i32(&mut buf, self.version);
        put_i32(&mut buf, self.kind);
        put_i32(&mut buf, self.password.len() as i32);
        buf.extend_from_slice(self.password.as_bytes());
        buf
    }

    /// Decode a complete datagram, magic prefix included.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = buf;
        let magic = read_magic(&mut reader).map_err(short)?;
        if !is_magic(&magic) {
            return Err(Error::Protocol("bad magic numbers".into()));
        }
        Self::read_body(&mut reader)
    }

    /// Read the fields following an already validated magic prefix.
    pub fn read_body<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let version = read_i32(reader).map_err(short)?;
        let kind = read_i32(reader).map_err(short)?;
        let len = read_i32(reader).map_err(short)?;
        if len < 0 || len as usize > MAX_PASSWORD_LEN {
            return Err(Error::Protocol(format!("password length {} out of range", len)));
        }
        let mut password = vec![0u8; len as usize];
        reader.read_exact(&mut password).map_err(short)?;
        let password = String::from_utf8(password)
            .map_err(|_| Error::Protocol("password is not UTF-8".into()))?;
        Ok(Self {
            version,
            kind,
            password,
        })
    }
}

/// Answer to a direct connection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeReply {
    /// Accepted; the proxy listens on this port.
    Accepted {
        /// Advertised proxy port.
        domain_port: u16,
    },
    /// Refused.
    Rejected {
        /// Error code.
        code: i32,
        /// Reason.
        message: String,
    },
}

impl HandshakeReply {
    /// Encode the reply.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::Accepted { domain_port } => {
                put_i32(&mut buf, REPLY_OK);
                put_i32(&mut buf, i32::from(*domain_port));
            }
            Self::Rejected { code, message } => {
                put_i32(&mut buf, *code);
                put_i32(&mut buf, message.len() as i32);
                buf.extend_from_slice(message.as_bytes());
            }
        }
        buf
    }

    /// Read a reply from a stream.
    pub fn read<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let code = read_i32(reader)?;
        if code == REPLY_OK {
            let port = read_i32(reader)?;
            let domain_port = u16::try_from(port)
                .ok()
                .filter(|p| *p != 0 && *p <= MAX_PROXY_PORT)
                .ok_or_else(|| Error::Protocol(format!("advertised port {} out of range", port)))?;
            return Ok(Self::Accepted { domain_port });
        }
        let len = read_i32(reader)?;
        if len < 0 || len as usize > MAX_REPLY_MESSAGE_LEN {
            return Err(Error::Protocol(format!("error message length {} out of range", len)));
        }
        let mut message = vec![0u8; len as usize];
        reader.read_exact(&mut message)?;
        Ok(Self::Rejected {
            code,
            message: String::from_utf8_lossy(&message).into_owned(),
        })
    }
}

/// Answer to a multicast discovery request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastReply {
    /// Name-server TCP port.
    pub tcp_port: u16,
    /// Name-server UDP port.
    pub udp_port: u16,
    /// `(ip, broadcast)` pairs the server is reachable on.
    pub addresses: Vec<(String, String)>,
}

impl MulticastReply {
    /// Encode the reply.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MIN_MULTICAST_REPLY_LEN + self.addresses.len() * 40);
        put_magic(&mut buf);
        put_i32(&mut buf, i32::from(self.tcp_port));
        put_i32(&mut buf, i32::from(self.udp_port));
        put_i32(&mut buf, self.addresses.len() as i32);
        for (ip, broadcast) in &self.addresses {
            put_string(&mut buf, ip);
            put_string(&mut buf, broadcast);
        }
        buf
    }

    /// Decode a datagram. Short or foreign datagrams are errors.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < MIN_MULTICAST_REPLY_LEN {
            return Err(Error::Protocol(format!(
                "multicast reply of {} bytes is too short",
                buf.len()
            )));
        }
        let mut reader = buf;
        let magic = read_magic(&mut reader).map_err(short)?;
        if !is_magic(&magic) {
            return Err(Error::Protocol("bad magic numbers".into()));
        }
        let tcp_port = read_port(&mut reader)?;
        let udp_port = read_port(&mut reader)?;
        let count = read_i32(&mut reader).map_err(short)?;
        if count < 0 {
            return Err(Error::Protocol(format!("negative address count {}", count)));
        }
        let mut addresses = Vec::new();
        for _ in 0..count {
            let ip = read_string(&mut reader)?;
            let broadcast = read_string(&mut reader)?;
            addresses.push((ip, broadcast));
        }
        Ok(Self {
            tcp_port,
            udp_port,
            addresses,
        })
    }
}

/// Encoded magic prefix.
pub fn magic_bytes() -> [u8; MAGIC_LEN] {
    let mut out = [0u8; MAGIC_LEN];
    for (chunk, word) in out.chunks_exact_mut(4).zip(MAGIC) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    out
}

/// True when `prefix` carries the three magic numbers.
pub fn is_magic(prefix: &[u8; MAGIC_LEN]) -> bool {
    *prefix == magic_bytes()
}

fn put_magic(buf: &mut Vec<u8>) {
    buf.extend_from_slice(&magic_bytes());
}

fn put_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    put_i32(buf, s.len() as i32);
    buf.extend_from_slice(s.as_bytes());
}

fn read_magic<R: Read + ?Sized>(reader: &mut R) -> io::Result<[u8; MAGIC_LEN]> {
    let mut magic = [0u8; MAGIC_LEN];
    reader.read_exact(&mut magic)?;
    Ok(magic)
}

pub(crate) fn read_i32<R: Read + ?Sized>(reader: &mut R) -> io::Result<i32> {
    let mut word = [0u8; 4];
    reader.read_exact(&mut word)?;
    Ok(i32::from_be_bytes(word))
}

fn read_port(reader: &mut &[u8]) -> Result<u16> {
    let port = read_i32(reader).map_err(short)?;
    u16::try_from(port).map_err(|_| Error::Protocol(format!("port {} out of range", port)))
}

fn read_string(reader: &mut &[u8]) -> Result<String> {
    let len = read_i32(reader).map_err(short)?;
    if len < 0 || len as usize > reader.len() {
        return Err(Error::Protocol(format!("string length {} out of range", len)));
    }
    let (bytes, rest) = reader.split_at(len as usize);
    *reader = rest;
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::Protocol("address is not UTF-8".into()))
}

fn short(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::Protocol("truncated request".into())
    } else {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KIND_DIRECT_TCP, KIND_MULTICAST};

    #[test]
    fn test_magic_spells_cmsg_is_cool() {
        assert_eq!(&magic_bytes(), b"cMsg is cool");
    }

    #[test]
    fn test_request_layout() {
        let bytes = HandshakeRequest::new(KIND_DIRECT_TCP, Some("pw")).encode();
        assert_eq!(bytes.len(), MAGIC_LEN + 12 + 2);
        assert_eq!(&bytes[MAGIC_LEN..MAGIC_LEN + 4], &PROTOCOL_VERSION.to_be_bytes());
        assert_eq!(&bytes[bytes.len() - 2..], b"pw");

        let decoded = HandshakeRequest::decode(&bytes).unwrap();
        assert_eq!(decoded.kind, KIND_DIRECT_TCP);
        assert_eq!(decoded.password, "pw");
    }

    #[test]
    fn test_request_rejects_oversized_password_length() {
        let mut bytes = HandshakeRequest::new(KIND_MULTICAST, None).encode();
        let at = bytes.len() - 4;
        bytes[at..].copy_from_slice(&(MAX_PASSWORD_LEN as i32 + 1).to_be_bytes());
        assert!(matches!(HandshakeRequest::decode(&bytes), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_rejected_reply_carries_message() {
        let reply = HandshakeReply::Rejected {
            code: 23,
            message: "wrong password".into(),
        };
        let bytes = reply.encode();
        assert_eq!(HandshakeReply::read(&mut bytes.as_slice()).unwrap(), reply);
    }

    #[test]
    fn test_accepted_reply_rejects_port_zero() {
        let bytes = HandshakeReply::Accepted { domain_port: 0 }.encode();
        assert!(HandshakeReply::read(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn test_accepted_reply_rejects_port_without_room() {
        for port in [u16::MAX, MAX_PROXY_PORT + 1] {
            let bytes = HandshakeReply::Accepted { domain_port: port }.encode();
            let err = HandshakeReply::read(&mut bytes.as_slice()).unwrap_err();
            assert!(matches!(err, Error::Protocol(_)), "port {}: {:?}", port, err);
        }

        let bytes = HandshakeReply::Accepted { domain_port: MAX_PROXY_PORT }.encode();
        assert_eq!(
            HandshakeReply::read(&mut bytes.as_slice()).unwrap(),
            HandshakeReply::Accepted { domain_port: MAX_PROXY_PORT }
        );
    }

    #[test]
    fn test_multicast_reply_minimum_length() {
        let reply = MulticastReply {
            tcp_port: 45000,
            udp_port: 45000,
            addresses: vec![("10.0.0.5".into(), "10.0.0.255".into())],
        };
        let bytes = reply.encode();
        assert_eq!(MulticastReply::decode(&bytes).unwrap(), reply);

        let empty = MulticastReply {
            addresses: Vec::new(),
            ..reply
        }
        .encode();
        assert_eq!(empty.len(), MIN_MULTICAST_REPLY_LEN);
        assert!(MulticastReply::decode(&empty[..MIN_MULTICAST_REPLY_LEN - 1]).is_err());
    }

    #[test]
    fn test_multicast_reply_truncated_pair() {
        let reply = MulticastReply {
            tcp_port: 1,
            udp_port: 2,
            addresses: vec![("10.0.0.5".into(), "10.0.0.255".into())],
        };
        let bytes = reply.encode();
        assert!(MulticastReply::decode(&bytes[..bytes.len() - 3]).is_err());
    }
}
