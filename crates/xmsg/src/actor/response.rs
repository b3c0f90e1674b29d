// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Pending synchronous-publication responses, keyed by reply topic.

use crate::message::Message;
use crossbeam::channel::{bounded, Receiver, Sender};
use dashmap::DashMap;

#[derive(Debug, Default)]
pub(crate) struct ResponseSlots {
    pending: DashMap<String, Sender<Message>>,
}

impl ResponseSlots {
    /// Open a slot for `reply_to`.
    pub(crate) fn register(&self, reply_to: &str) -> Receiver<Message> {
        let (tx, rx) = bounded(1);
        self.pending.insert(reply_to.to_string(), tx);
        rx
    }

    /// Hand `message` to the waiter of its topic. False when nobody waits
    /// (late or duplicate response).
    pub(crate) fn complete(&self, message: Message) -> bool {
        match self.pending.remove(message.topic().as_str()) {
            Some((_, tx)) => tx.try_send(message).is_ok(),
            None => false,
        }
    }

    pub(crate) fn cancel(&self, reply_to: &str) {
        self.pending.remove(reply_to);
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::Topic;
    use std::time::Duration;

    #[test]
    fn test_complete_once() {
        let slots = ResponseSlots::default();
        let rx = slots.register("ret:a:1");
        let response = Message::from_payload(Topic::wrap("ret:a:1"), 5i32);

        assert!(slots.complete(response.clone()));
        assert!(!slots.complete(response));
        let received = rx.recv_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(received.payload().unwrap(), crate::message::Payload::Int32(5));
        assert_eq!(slots.len(), 0);
    }

    #[test]
    fn test_cancelled_slot_drops_late_response() {
        let slots = ResponseSlots::default();
        let _rx = slots.register("ret:a:2");
        slots.cancel("ret:a:2");
        assert!(!slots.complete(Message::from_payload(Topic::wrap("ret:a:2"), "late")));
    }
}
