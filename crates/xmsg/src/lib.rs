// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! # xMsg - topic-based publish/subscribe messaging
//!
//! Actors publish [`Message`]s on hierarchical [`Topic`]s through a proxy
//! broker, find each other through a registrar, and reach remote servers
//! through a name server with failover across several candidates.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use xmsg::{Actor, CallbackMode, CallbackResult, Message, Topic};
//!
//! fn main() -> xmsg::Result<()> {
//!     let actor = Actor::new("reader");
//!     let topic = Topic::build_with_subject("detector", "tracks")?;
//!
//!     let _sub = actor.subscribe(actor.default_proxy(), &topic, |msg: Message| -> CallbackResult {
//!         println!("{} -> {:?}", msg.topic(), msg.payload());
//!         Ok(())
//!     }, CallbackMode::Sync)?;
//!
//!     let conn = actor.connect()?;
//!     actor.publish(&conn, &Message::from_payload(topic, 42i32))?;
//!     actor.release(conn);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                           Actor facade                              |
//! |   connect | publish | sync_publish | subscribe | register | find    |
//! +---------------------------------------------------------------------+
//! |  ConnectionPool / ProxyDriver  |  Listener / Subscription dispatch  |
//! +---------------------------------------------------------------------+
//! |  RegistrarDriver <-> Registrar  |  Connector (UDL failover)         |
//! |  RegistrationDatabase           |  NameServer + multicast responder |
//! +---------------------------------------------------------------------+
//! |           Transport: Context, framed TCP sockets, Proxy             |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`topic`] / [`message`] - identifiers and payloads
//! - [`transport`] - sockets, framing and the proxy broker
//! - [`connection`] - proxy drivers and the connection pool
//! - [`dispatch`] - listeners, subscriptions and callback modes
//! - [`registration`] - registrar service, database and client
//! - [`udl`] / [`failover`] / [`nameserver`] - server location and handshake

/// Actor facade.
pub mod actor;
/// Protocol constants and runtime settings.
pub mod config;
/// Proxy addresses, drivers and pooling.
pub mod connection;
/// Transport context (socket factory and lifetime).
pub mod context;
/// Message delivery to handlers.
pub mod dispatch;
/// Error type.
pub mod error;
/// Connect/failover state machine and multicast discovery.
pub mod failover;
/// Messages and typed payloads.
pub mod message;
/// Name-server accept loop, workers and multicast responder.
pub mod nameserver;
/// Host name and interface discovery.
pub mod netif;
/// Registrar service, database and driver.
pub mod registration;
/// Hierarchical topics.
pub mod topic;
/// Framed TCP sockets and the proxy broker.
pub mod transport;
/// UDL parsing.
pub mod udl;

pub use actor::{Actor, ActorConfig};
pub use config::{ConnectionSetup, ListenerSettings, NameServerSettings, RegistrarSettings};
pub use connection::{ConnectionPool, ProxyAddress, ProxyDriver, RegAddress, Role};
pub use context::Context;
pub use dispatch::{CallbackMode, CallbackResult, Listener, MessageHandler, Subscription};
pub use error::{Error, Result};
pub use failover::{Connector, Dialer, NetDialer};
pub use message::{Message, Metadata, Payload};
pub use nameserver::NameServer;
pub use registration::{OwnerType, Registrar, RegistrarDriver, Registration, RegistrationDatabase};
pub use topic::Topic;
pub use transport::Proxy;
pub use udl::ParsedUdl;
