// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! A subscription: one subscriber driver, one topic, one polling thread.

use super::handler::{CallbackMode, CallbackResult, MessageHandler, ModeDispatcher};
use super::listener::{Listener, ListenerMetrics};
use crate::config::{ConnectionSetup, ListenerSettings};
use crate::connection::ProxyDriver;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::topic::Topic;

struct DynHandler(Box<dyn MessageHandler>);

impl MessageHandler for DynHandler {
    fn handle(&self, message: Message) -> CallbackResult {
        self.0.handle(message)
    }
}

/// A running subscription.
///
/// The subscription is confirmed with the proxy before
/// [`Subscription::start`] returns, so messages published afterwards are
/// not lost to the subscribe race.
pub struct Subscription {
    topic: Topic,
    listener: Listener<ModeDispatcher<DynHandler>>,
    stopped: bool,
}

impl Subscription {
    /// Subscribe `driver` to `topic`, confirm it, and start delivering to
    /// `handler`.
    pub fn start(
        name: &str,
        driver: ProxyDriver,
        topic: Topic,
        handler: impl MessageHandler,
        mode: CallbackMode,
        setup: &ConnectionSetup,
        settings: ListenerSettings,
    ) -> Result<Self> {
        driver.subscribe(&topic)?;
        if setup.check_subscription {
            confirm(&driver, &topic, setup)?;
        }

        let dispatcher = ModeDispatcher::new(
            name,
            DynHandler(Box::new(handler)),
            mode,
            settings.callback_queue,
        );
        let mut listener = Listener::new(name, vec![driver], dispatcher, settings)?;
        listener.start()?;
        log::debug!("[subscription] {} listening on {}", name, topic);
        Ok(Self {
            topic,
            listener,
            stopped: false,
        })
    }

    /// Subscribed topic.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Subscription name.
    pub fn name(&self) -> &str {
        self.listener.name()
    }

    /// True until [`Subscription::stop`].
    pub fn is_running(&self) -> bool {
        !self.stopped
    }

    /// Delivery counters.
    pub fn metrics(&self) -> &ListenerMetrics {
        self.listener.metrics()
    }

    /// Unsubscribe, join the polling thread, close the socket and drain
    /// asynchronous callbacks. Idempotent.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Some(driver) = self.listener.drivers().first() {
            if let Err(e) = driver.unsubscribe(&self.topic) {
                log::debug!("[subscription] unsubscribe from {} failed: {}", self.topic, e);
            }
        }
        self.listener.stop();
        self.listener.handler().shutdown();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

fn confirm(driver: &ProxyDriver, topic: &Topic, setup: &ConnectionSetup) -> Result<()> {
    let attempts = setup.subscription_attempts.max(1);
    for attempt in 1..=attempts {
        if driver.check_subscription(topic, setup)? {
            return Ok(());
        }
        log::debug!(
            "[subscription] {} not confirmed (attempt {}/{})",
            topic,
            attempt,
            attempts
        );
    }
    driver.close();
    Err(Error::Timeout(format!(
        "subscription to {} not confirmed after {} attempt(s)",
        topic, attempts
    )))
}
