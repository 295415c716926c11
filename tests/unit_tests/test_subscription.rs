// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use linewatch_rs::connection::{
    observable::{ConnectionOptions, ObservableConnection},
    subscription::{ConnectionSubscriber, FreeSubscriber},
};

struct Collector {
    seen: Mutex<Vec<String>>,
    closed: AtomicUsize,
}

impl Collector {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().expect("seen poisoned").clone()
    }
}

impl ConnectionSubscriber for Collector {
    fn on_data(&self, data: &str) {
        self.seen.lock().expect("seen poisoned").push(data.to_string());
    }

    fn on_connection_closed(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_subscribe_is_idempotent_per_subject() {
    let connection = ObservableConnection::new();
    let collector = Collector::new();

    connection.subscribe(&collector);
    connection.subscribe(&collector);
    assert_eq!(connection.subscriber_count(), 1);

    connection.data_received(b"61 bytes");
    assert_eq!(collector.seen(), vec!["61 bytes"]);
}

#[test]
fn test_two_subjects_same_callback_are_two_subscriptions() {
    let connection = ObservableConnection::new();
    let first = Collector::new();
    let second = Collector::new();

    connection.subscribe(&first);
    connection.subscribe(&second);
    assert_eq!(connection.subscriber_count(), 2);

    connection.data_received(b"chunk");
    assert_eq!(first.seen(), vec!["chunk"]);
    assert_eq!(second.seen(), vec!["chunk"]);
}

#[test]
fn test_unsubscribe_of_absent_key_is_ignored() {
    let connection = ObservableConnection::new();
    let collector = Collector::new();

    // logged at warning level, no panic, no state change
    connection.unsubscribe(&collector);
    assert_eq!(connection.subscriber_count(), 0);
}

#[test]
fn test_dropped_subscriber_is_silently_skipped_and_pruned() {
    let connection = ObservableConnection::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let hits_in_cb = Arc::clone(&hits);
    let free = FreeSubscriber::new(
        move |_data| {
            hits_in_cb.fetch_add(1, Ordering::SeqCst);
        },
        || {},
    );
    connection.subscribe_free(&free);
    connection.data_received(b"first");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    drop(free);
    connection.data_received(b"second");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(connection.subscriber_count(), 0);
}

#[test]
fn test_shutdown_notifies_each_subscriber_once() {
    let connection = ObservableConnection::new();
    let collector = Collector::new();
    connection.subscribe(&collector);

    assert!(connection.is_open());
    connection.shutdown();
    connection.shutdown(); // re-entrant shutdown is a no-op

    assert_eq!(collector.closed.load(Ordering::SeqCst), 1);
    assert!(!connection.is_open());
    assert_eq!(connection.subscriber_count(), 0);

    // closed connection drops inbound data silently
    connection.data_received(b"late");
    assert!(collector.seen().is_empty());
}

#[test]
fn test_send_without_transport_fails() {
    let connection = ObservableConnection::new();
    assert!(connection.send("ping").is_err());
}

#[test]
fn test_send_goes_through_wired_transport() {
    let connection = ObservableConnection::with_options(ConnectionOptions {
        name: Some("wired".to_string()),
        ..ConnectionOptions::default()
    });

    let sent: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&sent);
    connection.wire_sender(move |payload| {
        sink.lock().expect("sent poisoned").push(payload.to_vec());
        Ok(())
    });

    connection.send("uname -a\n").expect("send failed");
    assert_eq!(
        sent.lock().expect("sent poisoned").as_slice(),
        &[b"uname -a\n".to_vec()]
    );
}

#[test]
fn test_transport_failure_surfaces_to_sender() {
    let connection = ObservableConnection::new();
    connection.wire_sender(|_payload| anyhow::bail!("broken pipe"));

    let err = connection.send("ls\n").expect_err("expected transport error");
    assert!(err.to_string().contains("broken pipe"));
}
