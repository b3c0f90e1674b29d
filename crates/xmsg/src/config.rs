// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! xMsg configuration: protocol constants and runtime settings.
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: wire constants, default ports, control tags
//! - **Level 2 (Dynamic)**: settings structs with `Default` impls, handed
//!   explicitly to the component that needs them
//!
//! Every port offset and magic value is defined here. Do not hardcode them
//! elsewhere.

use std::net::Ipv4Addr;
use std::time::Duration;

// =======================================================================
// Ports
// =======================================================================

/// Default proxy publish port. The subscribe port is always this + 1.
pub const DEFAULT_PROXY_PORT: u16 = 7771;

/// Offset from the proxy publish port to its subscribe port.
pub const PROXY_SUB_OFFSET: u16 = 1;

/// Offset from the proxy publish port to its control (confirmation) port.
pub const PROXY_CONTROL_OFFSET: u16 = 2;

/// Highest usable proxy publish port: the control port must still fit.
pub const MAX_PROXY_PORT: u16 = u16::MAX - PROXY_CONTROL_OFFSET;

/// Default registrar port.
pub const DEFAULT_REGISTRAR_PORT: u16 = 8888;

/// Default name-server TCP port.
pub const DEFAULT_NAME_SERVER_TCP_PORT: u16 = 45000;

/// Default name-server UDP (multicast discovery) port.
pub const DEFAULT_NAME_SERVER_UDP_PORT: u16 = 45000;

/// Multicast group used for name-server discovery.
pub const DEFAULT_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 220, 0, 0);

/// Lowest port a UDL may name explicitly.
pub const MIN_USER_PORT: u16 = 1024;

// =======================================================================
// Topics and control channel
// =======================================================================

/// Separator between topic components.
pub const TOPIC_SEPARATOR: char = ':';

/// Wildcard marker for a topic component.
pub const ANY: &str = "*";

/// First frame of every control-channel message.
pub const CTRL_TOPIC: &str = "xmsg:control";

/// Control tag: publish-connection probe.
pub const CTRL_CONNECT: &str = "pub";

/// Control tag: subscription probe.
pub const CTRL_SUBSCRIBE: &str = "sub";

/// Sub-socket command: add a subscription.
pub const CMD_SUBSCRIBE: &str = "subscribe";

/// Sub-socket command: drop a subscription.
pub const CMD_UNSUBSCRIBE: &str = "unsubscribe";

/// Prefix of the response topics used by synchronous publication.
pub const SYNC_REPLY_PREFIX: &str = "ret";

// =======================================================================
// Name-server protocol
// =======================================================================

/// Magic numbers opening every name-server request ("cMsg", " is ", "cool").
pub const MAGIC: [i32; 3] = [0x634d_7367, 0x2069_7320, 0x636f_6f6c];

/// Length of the magic-number prefix on the wire.
pub const MAGIC_LEN: usize = 12;

/// Protocol version carried in every request.
pub const PROTOCOL_VERSION: i32 = 6;

/// Message kind: UDP multicast discovery request.
pub const KIND_MULTICAST: i32 = 1;

/// Message kind: direct TCP connection request.
pub const KIND_DIRECT_TCP: i32 = 2;

/// Upper bound on a password carried in a request.
pub const MAX_PASSWORD_LEN: usize = 1024;

/// Multicast reply shorter than this is discarded.
pub const MIN_MULTICAST_REPLY_LEN: usize = 24;

/// Handshake reply code: accepted.
pub const REPLY_OK: i32 = 0;

/// Handshake reply code: argument out of range (unknown message kind).
pub const ERR_BAD_ARGUMENT: i32 = 4;

/// Handshake reply code: request did not start with the magic prefix.
pub const ERR_BAD_FORMAT: i32 = 5;

/// Handshake reply code: client speaks another protocol version.
pub const ERR_DIFFERENT_VERSION: i32 = 22;

/// Handshake reply code: password mismatch.
pub const ERR_WRONG_PASSWORD: i32 = 23;

/// Longest error message a client accepts in a handshake reply.
pub const MAX_REPLY_MESSAGE_LEN: usize = 64 * 1024;

/// Default bound on the wait for a multicast discovery reply.
pub const DEFAULT_MULTICAST_TIMEOUT: Duration = Duration::from_secs(2);

/// Default sub-domain when a UDL names none.
pub const DEFAULT_SUBDOMAIN: &str = "cMsg";

// =======================================================================
// Framing
// =======================================================================

/// Default maximum size of a single frame (16 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default number of decoded messages buffered per socket.
pub const DEFAULT_INBOX_CAPACITY: usize = 4096;

/// Default number of messages queued for asynchronous callback workers.
pub const DEFAULT_CALLBACK_QUEUE: usize = 1024;

/// Marker returned by the registrar for a successful request.
pub const SUCCESS: &str = "success";

// =======================================================================
// Runtime settings
// =======================================================================

/// Settings shared by every socket created from a [`crate::Context`].
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Maximum accepted frame size.
    pub max_message_size: usize,
    /// Decoded messages buffered per inbound socket before dropping.
    pub inbox_capacity: usize,
    /// Timeout for establishing TCP links.
    pub connect_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            connect_timeout: Duration::from_secs(3),
        }
    }
}

/// Connection and subscription confirmation policy for proxy drivers.
#[derive(Debug, Clone)]
pub struct ConnectionSetup {
    /// Confirm publish connections through the proxy control port.
    pub check_connection: bool,
    /// Total time allowed for the connection probe.
    pub connection_timeout: Duration,
    /// Confirm subscriptions before returning them.
    pub check_subscription: bool,
    /// Total time allowed per subscription probe attempt.
    pub subscription_timeout: Duration,
    /// Subscription probe attempts before giving up.
    pub subscription_attempts: u32,
    /// Wait slice used while polling for a probe echo.
    pub poll_slice: Duration,
}

impl Default for ConnectionSetup {
    fn default() -> Self {
        Self {
            check_connection: true,
            connection_timeout: Duration::from_secs(3),
            check_subscription: true,
            subscription_timeout: Duration::from_secs(3),
            subscription_attempts: 3,
            poll_slice: Duration::from_millis(100),
        }
    }
}

impl ConnectionSetup {
    /// Skip both confirmation handshakes.
    pub fn unchecked() -> Self {
        Self {
            check_connection: false,
            check_subscription: false,
            ..Self::default()
        }
    }

    /// Set the connection probe timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the per-attempt subscription probe timeout.
    pub fn with_subscription_timeout(mut self, timeout: Duration) -> Self {
        self.subscription_timeout = timeout;
        self
    }

    /// Set the number of subscription probe attempts.
    pub fn with_subscription_attempts(mut self, attempts: u32) -> Self {
        self.subscription_attempts = attempts.max(1);
        self
    }
}

/// Polling policy for listeners and subscriptions.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    /// Bounded wait per poll iteration.
    pub poll_slice: Duration,
    /// Messages waiting for an asynchronous callback worker. A full queue
    /// blocks the polling thread until a worker frees a slot.
    pub callback_queue: usize,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            poll_slice: Duration::from_millis(50),
            callback_queue: DEFAULT_CALLBACK_QUEUE,
        }
    }
}

impl ListenerSettings {
    /// Set the asynchronous callback queue length (at least 1).
    pub fn with_callback_queue(mut self, capacity: usize) -> Self {
        self.callback_queue = capacity.max(1);
        self
    }
}

/// Registrar service settings.
#[derive(Debug, Clone)]
pub struct RegistrarSettings {
    /// Bounded wait of the request loop between shutdown checks.
    pub poll_slice: Duration,
    /// Interval between two front-end synchronisations.
    pub sync_interval: Duration,
    /// Pause between two re-registrations during a synchronisation.
    pub sync_record_delay: Duration,
    /// Request timeout used when talking to the front-end.
    pub request_timeout: Duration,
}

impl Default for RegistrarSettings {
    fn default() -> Self {
        Self {
            poll_slice: Duration::from_millis(100),
            sync_interval: Duration::from_secs(5),
            sync_record_delay: Duration::from_millis(10),
            request_timeout: Duration::from_secs(3),
        }
    }
}

/// Multicast discovery timing on the client side.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    /// Interval between two discovery packets.
    pub send_interval: Duration,
    /// Delay before the first packet, so the receiver is already listening.
    pub receiver_startup_delay: Duration,
    /// Read timeout of the receiver between stop-flag checks.
    pub receive_quantum: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            send_interval: Duration::from_secs(1),
            receiver_startup_delay: Duration::from_millis(100),
            receive_quantum: Duration::from_millis(200),
        }
    }
}

/// Name-server settings.
#[derive(Debug, Clone)]
pub struct NameServerSettings {
    /// TCP port of the accept loop (0 picks an ephemeral port).
    pub tcp_port: u16,
    /// UDP port of the multicast responder (0 picks an ephemeral port).
    pub udp_port: u16,
    /// Run the multicast responder.
    pub multicast: bool,
    /// Multicast group joined by the responder.
    pub multicast_addr: Ipv4Addr,
    /// Password clients must present (None accepts any).
    pub password: Option<String>,
    /// Port advertised to clients after a successful handshake.
    pub domain_port: u16,
    /// Readiness-selection timeout of the accept loop.
    pub selector_timeout: Duration,
    /// Sleep between two reads of the magic prefix.
    pub sniff_quantum: Duration,
    /// Maximum number of sleeps while waiting for the magic prefix.
    pub sniff_attempts: u32,
    /// Socket timeout used by per-connection workers.
    pub worker_timeout: Duration,
}

impl Default for NameServerSettings {
    fn default() -> Self {
        Self {
            tcp_port: DEFAULT_NAME_SERVER_TCP_PORT,
            udp_port: DEFAULT_NAME_SERVER_UDP_PORT,
            multicast: true,
            multicast_addr: DEFAULT_MULTICAST_ADDR,
            password: None,
            domain_port: DEFAULT_PROXY_PORT,
            selector_timeout: Duration::from_secs(2),
            sniff_quantum: Duration::from_millis(10),
            sniff_attempts: 50,
            worker_timeout: Duration::from_secs(3),
        }
    }
}

impl NameServerSettings {
    /// Validate the settings.
    pub fn validate(&self) -> crate::Result<()> {
        if self.domain_port == 0 {
            return Err(crate::Error::Config("domain_port cannot be 0".into()));
        }
        if self.domain_port > MAX_PROXY_PORT {
            return Err(crate::Error::Config(format!(
                "domain_port {} leaves no room for the control port",
                self.domain_port
            )));
        }
        if self.sniff_attempts == 0 {
            return Err(crate::Error::Config("sniff_attempts cannot be 0".into()));
        }
        if self.selector_timeout.is_zero() {
            return Err(crate::Error::Config(
                "selector_timeout cannot be zero".into(),
            ));
        }
        if let Some(password) = &self.password {
            if password.len() > MAX_PASSWORD_LEN {
                return Err(crate::Error::Config("password too long".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_offsets() {
        assert_eq!(PROXY_SUB_OFFSET, 1);
        assert_eq!(PROXY_CONTROL_OFFSET, 2);
    }

    #[test]
    fn test_unchecked_setup() {
        let setup = ConnectionSetup::unchecked();
        assert!(!setup.check_connection);
        assert!(!setup.check_subscription);
        assert_eq!(setup.subscription_attempts, 3);
    }

    #[test]
    fn test_callback_queue_at_least_one() {
        assert_eq!(ListenerSettings::default().callback_queue, DEFAULT_CALLBACK_QUEUE);
        assert_eq!(ListenerSettings::default().with_callback_queue(0).callback_queue, 1);
    }

    #[test]
    fn test_subscription_attempts_at_least_one() {
        let setup = ConnectionSetup::default().with_subscription_attempts(0);
        assert_eq!(setup.subscription_attempts, 1);
    }

    #[test]
    fn test_name_server_validation() {
        assert!(NameServerSettings::default().validate().is_ok());

        let bad = NameServerSettings {
            domain_port: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = NameServerSettings {
            domain_port: u16::MAX,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = NameServerSettings {
            sniff_attempts: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_sniff_budget_is_half_a_second() {
        let settings = NameServerSettings::default();
        assert_eq!(
            settings.sniff_quantum * settings.sniff_attempts,
            Duration::from_millis(500)
        );
    }
}
