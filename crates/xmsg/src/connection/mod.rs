// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Proxy connections: addresses, drivers and the connection pool.

pub mod address;
pub mod driver;
pub mod pool;

pub use address::{ProxyAddress, RegAddress};
pub use driver::{ProxyDriver, Role};
pub use pool::ConnectionPool;
