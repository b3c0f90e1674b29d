// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! TCP transport for xMsg.
//!
//! # Sockets
//!
//! | Socket | Connects to | Direction |
//! |---|---|---|
//! | [`PubSocket`] | proxy port P | out |
//! | [`SubSocket`] | proxy port P+1 | commands out, messages in |
//! | [`ControlSocket`] | proxy port P+2 | identity out, echoes in |
//! | [`ReqSocket`] / [`RepSocket`] | registrar | request/reply |
//!
//! Sockets are created through a [`crate::Context`]. The [`Proxy`] broker is
//! the forwarding process the publish/subscribe sockets talk to.

mod acceptor;
pub mod frame_codec;
mod inbound;
pub(crate) mod net;
pub mod proxy;
pub mod reqrep;
pub mod socket;

pub use frame_codec::{FrameCodec, Frames};
pub use proxy::Proxy;
pub use reqrep::{RepSocket, ReqSocket, Request};
pub use socket::{ControlSocket, PubSocket, SubSocket};
