// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Actor facade: the usual entry point of an xMsg application.
//!
//! An [`Actor`] bundles a transport context, a connection pool, a default
//! proxy and registrar, and the bookkeeping for synchronous requests.
//!
//! ```text
//!   sync_publish(msg) --reply_to=ret:<id>:<seq>--> proxy --> responder
//!        ^                                                      |
//!        |      response listener on ret:<id> (one per proxy)   |
//!        +----------------- ResponseSlots <---------------------+
//! ```

mod response;

use crate::config::{ConnectionSetup, ListenerSettings, SYNC_REPLY_PREFIX};
use crate::connection::driver::generate_identity;
use crate::connection::{ConnectionPool, ProxyAddress, ProxyDriver, RegAddress};
use crate::context::Context;
use crate::dispatch::{CallbackMode, CallbackResult, MessageHandler, Subscription};
use crate::error::{Error, Result};
use crate::message::{Message, Payload};
use crate::registration::{OwnerType, RegistrarDriver, Registration};
use crate::topic::Topic;
use parking_lot::Mutex;
use response::ResponseSlots;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Where an actor connects by default and how.
#[derive(Debug, Clone, Default)]
pub struct ActorConfig {
    /// Default proxy.
    pub proxy: ProxyAddress,
    /// Default registrar.
    pub registrar: RegAddress,
    /// Connection and subscription confirmation policy.
    pub setup: ConnectionSetup,
    /// Polling policy of subscriptions.
    pub listener: ListenerSettings,
}

/// A named participant of the fabric.
pub struct Actor {
    name: String,
    id: String,
    ctx: Arc<Context>,
    config: ActorConfig,
    pool: ConnectionPool,
    registrar: Mutex<Option<RegistrarDriver>>,
    responses: Arc<ResponseSlots>,
    response_listeners: Mutex<HashMap<ProxyAddress, Subscription>>,
    sequence: AtomicU64,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("proxy", &self.config.proxy)
            .field("registrar", &self.config.registrar)
            .finish()
    }
}

impl Actor {
    /// Actor with its own context and default addresses.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, Context::new(), ActorConfig::default())
    }

    /// Actor on a shared context.
    pub fn with_config(name: impl Into<String>, ctx: Arc<Context>, config: ActorConfig) -> Self {
        let pool = ConnectionPool::new(Arc::clone(&ctx), config.setup.clone());
        Self {
            name: name.into(),
            id: generate_identity(),
            ctx,
            config,
            pool,
            registrar: Mutex::new(None),
            responses: Arc::new(ResponseSlots::default()),
            response_listeners: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Actor name, used in registrations.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique id, used in reply topics.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Transport context.
    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Default proxy.
    pub fn default_proxy(&self) -> &ProxyAddress {
        &self.config.proxy
    }

    /// Default registrar.
    pub fn default_registrar(&self) -> &RegAddress {
        &self.config.registrar
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(Error::Closed("actor"));
        }
        Ok(())
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Publisher connection to the default proxy.
    pub fn connect(&self) -> Result<ProxyDriver> {
        self.connect_to(&self.config.proxy)
    }

    /// Publisher connection to `address`, reused from the pool when
    /// possible.
    pub fn connect_to(&self, address: &ProxyAddress) -> Result<ProxyDriver> {
        self.ensure_alive()?;
        self.pool.get(address)
    }

    /// Return a connection to the pool.
    pub fn release(&self, driver: ProxyDriver) {
        self.pool.release(driver);
    }

    // ========================================================================
    // Publication
    // ========================================================================

    /// Publish `message` through `driver`.
    pub fn publish(&self, driver: &ProxyDriver, message: &Message) -> Result<()> {
        self.ensure_alive()?;
        driver.send(message)
    }

    /// Publish `message` and wait up to `timeout` for its response.
    ///
    /// The response travels on a private reply topic to a listener this
    /// actor keeps on the driver's proxy.
    pub fn sync_publish(&self, driver: &ProxyDriver, mut message: Message, timeout: Duration) -> Result<Message> {
        self.ensure_alive()?;
        self.ensure_response_listener(driver.address())?;

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let reply_to = format!("{}:{}:{}", SYNC_REPLY_PREFIX, self.id, seq);
        let waiter = self.responses.register(&reply_to);
        message.set_reply_to(reply_to.clone());

        if let Err(e) = driver.send(&message) {
            self.responses.cancel(&reply_to);
            return Err(e);
        }
        let response = waiter.recv_timeout(timeout);
        self.responses.cancel(&reply_to);
        response.map_err(|_| {
            Error::Timeout(format!(
                "no response to {} within {:?}",
                message.topic(),
                timeout
            ))
        })
    }

    /// Number of synchronous requests awaiting a response.
    pub fn pending_responses(&self) -> usize {
        self.responses.len()
    }

    fn ensure_response_listener(&self, address: &ProxyAddress) -> Result<()> {
        let mut listeners = self.response_listeners.lock();
        if listeners.contains_key(address) {
            return Ok(());
        }
        let topic = Topic::wrap(format!("{}:{}", SYNC_REPLY_PREFIX, self.id));
        let responses = Arc::clone(&self.responses);
        let handler = move |message: Message| -> CallbackResult {
            if !responses.complete(message) {
                log::debug!("[actor] dropping unexpected response");
            }
            Ok(())
        };
        let subscription = Subscription::start(
            &format!("{}-responses", self.name),
            self.pool.subscriber(address)?,
            topic,
            handler,
            CallbackMode::Sync,
            &self.config.setup,
            self.config.listener.clone(),
        )?;
        listeners.insert(address.clone(), subscription);
        Ok(())
    }

    /// Answer a synchronous request through the default proxy.
    pub fn reply(&self, request: &Message, payload: impl Into<Payload>) -> Result<()> {
        let response = request.response(payload)?;
        let driver = self.connect()?;
        let sent = driver.send(&response);
        self.release(driver);
        sent
    }

    // ========================================================================
    // Subscription
    // ========================================================================

    /// Subscribe to `topic` on `address` and deliver to `handler`.
    pub fn subscribe(
        &self,
        address: &ProxyAddress,
        topic: &Topic,
        handler: impl MessageHandler,
        mode: CallbackMode,
    ) -> Result<Subscription> {
        self.ensure_alive()?;
        let driver = self.pool.subscriber(address)?;
        Subscription::start(
            &format!("{}-{}", self.name, topic),
            driver,
            topic.clone(),
            handler,
            mode,
            &self.config.setup,
            self.config.listener.clone(),
        )
    }

    /// Stop a subscription.
    pub fn unsubscribe(&self, mut subscription: Subscription) {
        subscription.stop();
    }

    // ========================================================================
    // Registration
    // ========================================================================

    fn with_registrar<T>(&self, f: impl FnOnce(&RegistrarDriver) -> Result<T>) -> Result<T> {
        self.ensure_alive()?;
        let mut registrar = self.registrar.lock();
        if registrar.is_none() {
            *registrar = Some(RegistrarDriver::new(
                &self.ctx,
                self.config.registrar.clone(),
                self.name.clone(),
            )?);
        }
        match registrar.as_ref() {
            Some(driver) => f(driver),
            None => Err(Error::InvalidState("registrar driver missing".into())),
        }
    }

    fn record(&self, topic: &Topic, description: &str, owner: OwnerType) -> Registration {
        Registration::new(self.name.clone(), description, topic, &self.config.proxy, owner)
    }

    /// Register as a publisher of `topic` on the default proxy.
    pub fn register_as_publisher(&self, topic: &Topic, description: &str) -> Result<()> {
        let record = self.record(topic, description, OwnerType::Publisher);
        self.with_registrar(|r| r.add_registration(&record))
    }

    /// Register as a subscriber of `topic` on the default proxy.
    pub fn register_as_subscriber(&self, topic: &Topic, description: &str) -> Result<()> {
        let record = self.record(topic, description, OwnerType::Subscriber);
        self.with_registrar(|r| r.add_registration(&record))
    }

    /// Remove the publisher registration on `topic`.
    pub fn deregister_as_publisher(&self, topic: &Topic) -> Result<()> {
        let record = self.record(topic, "", OwnerType::Publisher);
        self.with_registrar(|r| r.remove_registration(&record))
    }

    /// Remove the subscriber registration on `topic`.
    pub fn deregister_as_subscriber(&self, topic: &Topic) -> Result<()> {
        let record = self.record(topic, "", OwnerType::Subscriber);
        self.with_registrar(|r| r.remove_registration(&record))
    }

    /// Publishers whose messages reach a subscriber of `topic`: those on
    /// `topic` or one of its children.
    pub fn find_publishers(&self, topic: &Topic) -> Result<HashSet<Registration>> {
        self.with_registrar(|r| r.rfind(topic, OwnerType::Publisher))
    }

    /// Subscribers that receive messages published on `topic`: those on
    /// `topic` or one of its parents.
    pub fn find_subscribers(&self, topic: &Topic) -> Result<HashSet<Registration>> {
        self.with_registrar(|r| r.find(topic, OwnerType::Subscriber))
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Stop response listeners, close pooled connections and the registrar
    /// link. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        for (_, mut subscription) in self.response_listeners.lock().drain() {
            subscription.stop();
        }
        self.pool.destroy();
        if let Some(registrar) = self.registrar.lock().take() {
            registrar.close();
        }
        log::debug!("[actor] {} destroyed", self.name);
    }
}

impl Drop for Actor {
    fn drop(&mut self) {
        self.destroy();
    }
}
