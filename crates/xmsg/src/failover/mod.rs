// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Client connection with failover across a UDL list.

pub mod connector;
pub mod dialer;
pub mod handshake;
pub mod multicast;
pub mod subnet;

pub use connector::{Connector, Dialer, Phase, ServerLocation};
pub use dialer::{NetDialer, ServerSession};
