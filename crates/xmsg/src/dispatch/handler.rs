// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Message handlers and callback execution modes.

use super::worker_pool::WorkerPool;
use crate::message::Message;
use std::sync::Arc;

/// Error returned by a handler. Logged by the dispatcher, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one handler invocation.
pub type CallbackResult = std::result::Result<(), HandlerError>;

/// Receives application messages from a listener or subscription.
///
/// Any closure `Fn(Message) -> CallbackResult` is a handler:
///
/// ```
/// use xmsg::dispatch::{CallbackResult, MessageHandler};
/// use xmsg::Message;
///
/// fn takes_handler(_: impl MessageHandler) {}
/// takes_handler(|msg: Message| -> CallbackResult {
///     println!("got {}", msg.topic());
///     Ok(())
/// });
/// ```
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one message.
    fn handle(&self, message: Message) -> CallbackResult;
}

impl<F> MessageHandler for F
where
    F: Fn(Message) -> CallbackResult + Send + Sync + 'static,
{
    fn handle(&self, message: Message) -> CallbackResult {
        self(message)
    }
}

/// Where callbacks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackMode {
    /// On the polling thread; strict delivery order, one at a time.
    #[default]
    Sync,
    /// On a pool of `workers` threads; completion order is not preserved.
    /// The queue in front of the pool is bounded by
    /// [`crate::config::ListenerSettings::callback_queue`].
    Async {
        /// Worker thread count (at least 1).
        workers: usize,
    },
}

/// Handler running another handler in the selected [`CallbackMode`].
pub(crate) struct ModeDispatcher<H: MessageHandler> {
    handler: Arc<H>,
    pool: Option<WorkerPool>,
}

impl<H: MessageHandler> ModeDispatcher<H> {
    /// `queue` bounds the messages waiting for an asynchronous worker.
    pub(crate) fn new(name: &str, handler: H, mode: CallbackMode, queue: usize) -> Self {
        let pool = match mode {
            CallbackMode::Sync => None,
            CallbackMode::Async { workers } => Some(WorkerPool::new(name, workers, queue)),
        };
        Self {
            handler: Arc::new(handler),
            pool,
        }
    }

    /// Wait for queued callbacks and stop the workers.
    pub(crate) fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
    }
}

impl<H: MessageHandler> MessageHandler for ModeDispatcher<H> {
    fn handle(&self, message: Message) -> CallbackResult {
        let Some(pool) = &self.pool else {
            return self.handler.handle(message);
        };
        let handler = Arc::clone(&self.handler);
        let topic = message.topic().clone();
        pool.execute(move || {
            if let Err(e) = handler.handle(message) {
                log::warn!("[listener] async callback on {} failed: {}", topic, e);
            }
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::Topic;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closure_is_handler() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handler = move |_msg: Message| -> CallbackResult {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        let msg = Message::from_payload(Topic::build("d").unwrap(), 1i32);
        handler.handle(msg).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_async_dispatch_runs_on_pool() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let dispatcher = ModeDispatcher::new(
            "test",
            move |_msg: Message| -> CallbackResult {
                c.fetch_add(1, Ordering::SeqCst);
                Err("boom".into())
            },
            CallbackMode::Async { workers: 2 },
            4,
        );
        for i in 0..10i32 {
            let msg = Message::from_payload(Topic::build("d").unwrap(), i);
            assert!(dispatcher.handle(msg).is_ok());
        }
        dispatcher.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }
}
