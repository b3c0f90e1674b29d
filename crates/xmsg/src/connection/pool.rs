// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Connection pool.
//!
//! Publisher drivers are expensive to confirm, so released ones are kept per
//! proxy and handed out again. Subscriber drivers are never pooled; each
//! subscription owns its link.

use super::address::ProxyAddress;
use super::driver::ProxyDriver;
use crate::config::ConnectionSetup;
use crate::context::Context;
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;

/// Pool of publisher connections keyed by proxy.
#[derive(Debug)]
pub struct ConnectionPool {
    ctx: Arc<Context>,
    setup: ConnectionSetup,
    idle: DashMap<ProxyAddress, Vec<ProxyDriver>>,
}

impl ConnectionPool {
    /// Empty pool creating drivers with `setup`.
    pub fn new(ctx: Arc<Context>, setup: ConnectionSetup) -> Self {
        Self {
            ctx,
            setup,
            idle: DashMap::new(),
        }
    }

    /// Confirmation policy applied to new drivers.
    pub fn setup(&self) -> &ConnectionSetup {
        &self.setup
    }

    /// Publisher driver for `address`, reused when one is idle.
    ///
    /// A new driver is confirmed first when the setup asks for it; an
    /// unconfirmed one is closed and reported as a timeout.
    pub fn get(&self, address: &ProxyAddress) -> Result<ProxyDriver> {
        if let Some(mut idle) = self.idle.get_mut(address) {
            while let Some(driver) = idle.pop() {
                if !driver.is_closed() {
                    return Ok(driver);
                }
            }
        }
        self.open_publisher(address)
    }

    fn open_publisher(&self, address: &ProxyAddress) -> Result<ProxyDriver> {
        let driver = ProxyDriver::publisher(&self.ctx, address.clone())?;
        if self.setup.check_connection && !driver.check_connection(&self.setup)? {
            driver.close();
            return Err(Error::Timeout(format!(
                "proxy {} did not confirm the connection",
                address
            )));
        }
        log::debug!("[pool] new publisher connection to {}", address);
        Ok(driver)
    }

    /// New subscriber driver for `address`. Never pooled.
    pub fn subscriber(&self, address: &ProxyAddress) -> Result<ProxyDriver> {
        ProxyDriver::subscriber(&self.ctx, address.clone())
    }

    /// Return a publisher driver to the pool. Closed drivers are dropped.
    pub fn release(&self, driver: ProxyDriver) {
        if driver.is_closed() {
            return;
        }
        self.idle
            .entry(driver.address().clone())
            .or_default()
            .push(driver);
    }

    /// Number of idle drivers across all proxies.
    pub fn idle_count(&self) -> usize {
        self.idle.iter().map(|e| e.value().len()).sum()
    }

    /// Close every idle driver.
    pub fn destroy(&self) {
        self.idle.retain(|_, drivers| {
            for driver in drivers.drain(..) {
                driver.close();
            }
            false
        });
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Proxy;

    #[test]
    fn test_release_then_reuse() {
        let ctx = Context::new();
        let proxy = Proxy::start(&ctx, ProxyAddress::new("127.0.0.1", 0)).unwrap();
        let pool = ConnectionPool::new(Arc::clone(&ctx), ConnectionSetup::default());

        let driver = pool.get(proxy.address()).unwrap();
        let identity = driver.identity().to_string();
        pool.release(driver);
        assert_eq!(pool.idle_count(), 1);

        let again = pool.get(proxy.address()).unwrap();
        assert_eq!(again.identity(), identity);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_closed_driver_not_pooled() {
        let ctx = Context::new();
        let proxy = Proxy::start(&ctx, ProxyAddress::new("127.0.0.1", 0)).unwrap();
        let pool = ConnectionPool::new(Arc::clone(&ctx), ConnectionSetup::unchecked());
        let driver = pool.get(proxy.address()).unwrap();
        driver.close();
        pool.release(driver);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_destroy_closes_idle() {
        let ctx = Context::new();
        let proxy = Proxy::start(&ctx, ProxyAddress::new("127.0.0.1", 0)).unwrap();
        let pool = ConnectionPool::new(Arc::clone(&ctx), ConnectionSetup::unchecked());
        pool.release(pool.get(proxy.address()).unwrap());
        pool.destroy();
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_unreachable_proxy() {
        let ctx = Context::new();
        let pool = ConnectionPool::new(Arc::clone(&ctx), ConnectionSetup::unchecked());
        // Nothing listens on the discard port.
        assert!(pool.get(&ProxyAddress::new("127.0.0.1", 9)).is_err());
    }
}
