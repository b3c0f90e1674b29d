// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Polling listener over one or more subscriber drivers.
//!
//! # Architecture
//!
//! ```text
//! Select(inbox 0..n, poll slice) -> try_recv -> 2 frames? drop (control)
//!                                                  v
//!                                     Message::from_frames -> handler.handle()
//! ```
//!
//! Handler errors and panics are logged and counted; the loop keeps going.
//! Messages from one driver reach the handler in arrival order.

use super::handler::MessageHandler;
use crate::config::ListenerSettings;
use crate::connection::{ProxyDriver, Role};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::transport::Frames;
use crossbeam::channel::{Select, TryRecvError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Lifecycle of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Not polling. Initial and final state.
    Stopped,
    /// Polling thread active.
    Running,
}

/// Listener counters.
#[derive(Debug, Default)]
pub struct ListenerMetrics {
    /// Application messages handed to the handler
    pub messages_delivered: AtomicU64,
    /// Control frames filtered out
    pub control_dropped: AtomicU64,
    /// Messages that could not be decoded
    pub decode_errors: AtomicU64,
    /// Handler failures (errors and panics)
    pub handler_errors: AtomicU64,
}

impl ListenerMetrics {
    /// Snapshot as `(delivered, control, decode errors, handler errors)`.
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.messages_delivered.load(Ordering::Relaxed),
            self.control_dropped.load(Ordering::Relaxed),
            self.decode_errors.load(Ordering::Relaxed),
            self.handler_errors.load(Ordering::Relaxed),
        )
    }
}

/// Polls subscriber drivers on one thread and feeds a handler.
pub struct Listener<H: MessageHandler> {
    name: String,
    drivers: Arc<Vec<ProxyDriver>>,
    handler: Arc<H>,
    settings: ListenerSettings,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    metrics: Arc<ListenerMetrics>,
    finished: bool,
}

impl<H: MessageHandler> Listener<H> {
    /// Listener over `drivers`, all of which must be subscribers.
    pub fn new(
        name: impl Into<String>,
        drivers: Vec<ProxyDriver>,
        handler: H,
        settings: ListenerSettings,
    ) -> Result<Self> {
        if let Some(d) = drivers.iter().find(|d| d.role() != Role::Subscriber) {
            return Err(Error::InvalidState(format!(
                "listener needs subscriber drivers, got a {} for {}",
                d.role(),
                d.address()
            )));
        }
        Ok(Self {
            name: name.into(),
            drivers: Arc::new(drivers),
            handler: Arc::new(handler),
            settings,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            metrics: Arc::new(ListenerMetrics::default()),
            finished: false,
        })
    }

    /// Listener name, also used for its thread.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> ListenerState {
        if self.thread.is_some() {
            ListenerState::Running
        } else {
            ListenerState::Stopped
        }
    }

    /// Counters.
    pub fn metrics(&self) -> &ListenerMetrics {
        &self.metrics
    }

    /// Drivers polled by this listener.
    pub fn drivers(&self) -> &[ProxyDriver] {
        &self.drivers
    }

    pub(crate) fn handler(&self) -> &H {
        &self.handler
    }

    /// Spawn the polling thread.
    ///
    /// Fails when already running, or when a previous `stop` closed the
    /// sockets.
    pub fn start(&mut self) -> Result<()> {
        if self.thread.is_some() {
            return Err(Error::InvalidState(format!("listener {} already running", self.name)));
        }
        if self.finished {
            return Err(Error::InvalidState(format!(
                "listener {} was stopped and its sockets closed",
                self.name
            )));
        }
        self.running.store(true, Ordering::Release);

        let ctx = PollContext {
            name: self.name.clone(),
            drivers: Arc::clone(&self.drivers),
            handler: Arc::clone(&self.handler),
            settings: self.settings.clone(),
            running: Arc::clone(&self.running),
            metrics: Arc::clone(&self.metrics),
        };
        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        let thread = thread::Builder::new()
            .name(format!("xmsg-listener-{}", self.name))
            .spawn(move || ctx.run())
            .expect("failed to spawn listener thread");
        self.thread = Some(thread);
        log::debug!("[listener] {} started on {} socket(s)", self.name, self.drivers.len());
        Ok(())
    }

    /// Signal the thread, join it, then close every socket.
    ///
    /// No callback is running once this returns. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            log::debug!("[listener] {} stopped", self.name);
        }
        if !self.finished {
            for driver in self.drivers.iter() {
                driver.close();
            }
            self.finished = true;
        }
    }
}

impl<H: MessageHandler> Drop for Listener<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PollContext<H: MessageHandler> {
    name: String,
    drivers: Arc<Vec<ProxyDriver>>,
    handler: Arc<H>,
    settings: ListenerSettings,
    running: Arc<AtomicBool>,
    metrics: Arc<ListenerMetrics>,
}

impl<H: MessageHandler> PollContext<H> {
    fn run(self) {
        let mut active: Vec<usize> = (0..self.drivers.len()).collect();

        while self.running.load(Ordering::Acquire) {
            if active.is_empty() {
                thread::sleep(self.settings.poll_slice);
                continue;
            }

            let mut select = Select::new();
            for &i in &active {
                if let Some(inbox) = self.drivers[i].inbox() {
                    select.recv(inbox);
                }
            }
            let Ok(ready) = select.ready_timeout(self.settings.poll_slice) else {
                continue;
            };
            let index = active[ready];
            let Some(inbox) = self.drivers[index].inbox() else {
                continue;
            };
            match inbox.try_recv() {
                Ok(frames) => self.dispatch(frames),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    log::warn!(
                        "[listener] {} lost its link to {}",
                        self.name,
                        self.drivers[index].address()
                    );
                    active.remove(ready);
                }
            }
        }
    }

    fn dispatch(&self, frames: Frames) {
        if frames.len() == 2 {
            self.metrics.control_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let message = match Message::from_frames(frames) {
            Ok(m) => m,
            Err(e) => {
                self.metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("[listener] {} dropped undecodable message: {}", self.name, e);
                return;
            }
        };

        let topic = message.topic().clone();
        self.metrics.messages_delivered.fetch_add(1, Ordering::Relaxed);
        match catch_unwind(AssertUnwindSafe(|| self.handler.handle(message))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.metrics.handler_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("[listener] {} callback on {} failed: {}", self.name, topic, e);
            }
            Err(_) => {
                self.metrics.handler_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("[listener] {} callback on {} panicked", self.name, topic);
            }
        }
    }
}
