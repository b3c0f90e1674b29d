// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! Publish/subscribe and synchronous requests through a loopback proxy.

use crossbeam::channel::{unbounded, Receiver};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use xmsg::{
    Actor, ActorConfig, CallbackMode, CallbackResult, Context, Error, Message, Payload, Proxy,
    ProxyAddress, ProxyDriver, Topic,
};

const WAIT: Duration = Duration::from_secs(5);

fn fixture() -> (Arc<Context>, Proxy) {
    let ctx = Context::new();
    let proxy = Proxy::start(&ctx, ProxyAddress::new("127.0.0.1", 0)).unwrap();
    (ctx, proxy)
}

fn actor(name: &str, ctx: &Arc<Context>, proxy: &Proxy) -> Actor {
    let config = ActorConfig {
        proxy: proxy.address().clone(),
        ..ActorConfig::default()
    };
    Actor::with_config(name, Arc::clone(ctx), config)
}

fn int_of(rx: &Receiver<Message>) -> i32 {
    match rx.recv_timeout(WAIT).unwrap().payload().unwrap() {
        Payload::Int32(v) => v,
        other => panic!("unexpected payload {:?}", other),
    }
}

fn wait_until(done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while !done() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    true
}

#[test]
fn test_parent_subscription_receives_children() {
    let (ctx, proxy) = fixture();
    let reader = actor("reader", &ctx, &proxy);
    let writer = actor("writer", &ctx, &proxy);

    let (tx, rx) = unbounded();
    let domain = Topic::build("detector").unwrap();
    let _sub = reader
        .subscribe(
            proxy.address(),
            &domain,
            move |msg: Message| -> CallbackResult {
                tx.send(msg)?;
                Ok(())
            },
            CallbackMode::Sync,
        )
        .unwrap();
    assert!(proxy.subscriber_count() >= 1);

    let conn = writer.connect().unwrap();
    let child = Topic::build_with_type("detector", "tracks", "raw").unwrap();
    writer.publish(&conn, &Message::from_payload(Topic::build("other").unwrap(), 0i32)).unwrap();
    writer.publish(&conn, &Message::from_payload(child.clone(), 7i32)).unwrap();

    let got = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(got.topic(), &child);
    assert_eq!(got.payload().unwrap(), Payload::Int32(7));
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    writer.release(conn);
}

#[test]
fn test_failing_callback_keeps_subscription_alive() {
    let (ctx, proxy) = fixture();
    let reader = actor("reader", &ctx, &proxy);
    let writer = actor("writer", &ctx, &proxy);

    let topic = Topic::build_with_subject("detector", "hits").unwrap();
    let (tx, rx) = unbounded();
    let sub = reader
        .subscribe(
            proxy.address(),
            &topic,
            move |msg: Message| -> CallbackResult {
                tx.send(msg.clone())?;
                if msg.payload()? == Payload::Int32(2) {
                    return Err("refusing two".into());
                }
                Ok(())
            },
            CallbackMode::Sync,
        )
        .unwrap();

    let conn = writer.connect().unwrap();
    for i in 1..=3i32 {
        writer.publish(&conn, &Message::from_payload(topic.clone(), i)).unwrap();
    }

    assert_eq!(int_of(&rx), 1);
    assert_eq!(int_of(&rx), 2);
    assert_eq!(int_of(&rx), 3);
    assert!(sub.is_running());
    assert_eq!(sub.metrics().handler_errors.load(Ordering::Relaxed), 1);
    reader.unsubscribe(sub);
}

#[test]
fn test_handler_failing_every_message() {
    let (ctx, proxy) = fixture();
    let reader = actor("reader", &ctx, &proxy);
    let writer = actor("writer", &ctx, &proxy);

    let topic = Topic::build_with_subject("detector", "rejects").unwrap();
    let (tx, rx) = unbounded();
    let sub = reader
        .subscribe(
            proxy.address(),
            &topic,
            move |msg: Message| -> CallbackResult {
                tx.send(msg)?;
                Err("never satisfied".into())
            },
            CallbackMode::Sync,
        )
        .unwrap();

    let conn = writer.connect().unwrap();
    for i in 0..5i32 {
        writer.publish(&conn, &Message::from_payload(topic.clone(), i)).unwrap();
    }

    let seen: Vec<i32> = (0..5).map(|_| int_of(&rx)).collect();
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    assert!(wait_until(|| sub.metrics().handler_errors.load(Ordering::Relaxed) == 5));
    assert_eq!(sub.metrics().messages_delivered.load(Ordering::Relaxed), 5);
    assert!(sub.is_running());
    writer.release(conn);
    reader.unsubscribe(sub);
}

#[test]
fn test_panicking_handler_keeps_listening() {
    let (ctx, proxy) = fixture();
    let reader = actor("reader", &ctx, &proxy);
    let writer = actor("writer", &ctx, &proxy);

    let topic = Topic::build_with_subject("detector", "crashes").unwrap();
    let (tx, rx) = unbounded();
    let sub = reader
        .subscribe(
            proxy.address(),
            &topic,
            move |msg: Message| -> CallbackResult {
                tx.send(msg)?;
                panic!("handler blew up");
            },
            CallbackMode::Sync,
        )
        .unwrap();

    let conn = writer.connect().unwrap();
    for i in 0..4i32 {
        writer.publish(&conn, &Message::from_payload(topic.clone(), i)).unwrap();
    }

    let seen: Vec<i32> = (0..4).map(|_| int_of(&rx)).collect();
    assert_eq!(seen, vec![0, 1, 2, 3]);
    assert!(wait_until(|| sub.metrics().handler_errors.load(Ordering::Relaxed) == 4));
    assert_eq!(sub.metrics().messages_delivered.load(Ordering::Relaxed), 4);
    assert!(sub.is_running());
    writer.release(conn);
    reader.unsubscribe(sub);
}

#[test]
fn test_async_callbacks_see_every_message() {
    let (ctx, proxy) = fixture();
    let reader = actor("reader", &ctx, &proxy);
    let writer = actor("writer", &ctx, &proxy);

    let topic = Topic::build_with_subject("detector", "bulk").unwrap();
    let (tx, rx) = unbounded();
    let _sub = reader
        .subscribe(
            proxy.address(),
            &topic,
            move |msg: Message| -> CallbackResult {
                tx.send(msg)?;
                Ok(())
            },
            CallbackMode::Async { workers: 3 },
        )
        .unwrap();

    let conn = writer.connect().unwrap();
    for i in 0..20i32 {
        writer.publish(&conn, &Message::from_payload(topic.clone(), i)).unwrap();
    }

    let mut seen: Vec<i32> = (0..20).map(|_| int_of(&rx)).collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..20).collect::<Vec<_>>());
}

#[test]
fn test_sync_publish_round_trip() {
    let (ctx, proxy) = fixture();
    let requester = actor("requester", &ctx, &proxy);
    let responder = actor("responder", &ctx, &proxy);

    let reply_link = Mutex::new(ProxyDriver::publisher(&ctx, proxy.address().clone()).unwrap());
    let service = Topic::build_with_subject("svc", "double").unwrap();
    let _sub = responder
        .subscribe(
            proxy.address(),
            &service,
            move |request: Message| -> CallbackResult {
                let Payload::Int32(v) = request.payload()? else {
                    return Err("expected an int".into());
                };
                let response = request.response(v * 2)?;
                reply_link
                    .lock()
                    .map_err(|_| "reply link poisoned")?
                    .send(&response)?;
                Ok(())
            },
            CallbackMode::Sync,
        )
        .unwrap();

    let conn = requester.connect().unwrap();
    let response = requester
        .sync_publish(&conn, Message::from_payload(service.clone(), 21i32), WAIT)
        .unwrap();
    assert_eq!(response.payload().unwrap(), Payload::Int32(42));

    // a second request reuses the response listener
    let response = requester
        .sync_publish(&conn, Message::from_payload(service, 5i32), WAIT)
        .unwrap();
    assert_eq!(response.payload().unwrap(), Payload::Int32(10));
    assert_eq!(requester.pending_responses(), 0);
}

#[test]
fn test_sync_publish_without_responder_times_out() {
    let (ctx, proxy) = fixture();
    let requester = actor("requester", &ctx, &proxy);

    let conn = requester.connect().unwrap();
    let topic = Topic::build_with_subject("svc", "nobody").unwrap();
    let err = requester
        .sync_publish(&conn, Message::from_payload(topic, 1i32), Duration::from_millis(300))
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "got {:?}", err);
    assert_eq!(requester.pending_responses(), 0);
}

#[test]
fn test_destroyed_actor_refuses_work() {
    let (ctx, proxy) = fixture();
    let writer = actor("writer", &ctx, &proxy);
    writer.destroy();
    writer.destroy();

    assert!(matches!(writer.connect(), Err(Error::Closed(_))));
}
