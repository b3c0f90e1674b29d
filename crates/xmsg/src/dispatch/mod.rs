// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Message dispatch: listeners, subscriptions and callback execution.

pub mod handler;
pub mod listener;
pub mod subscription;
mod worker_pool;

pub use handler::{CallbackMode, CallbackResult, HandlerError, MessageHandler};
pub use listener::{Listener, ListenerMetrics, ListenerState};
pub use subscription::Subscription;
