// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use linewatch_rs::{
    errors::ObserveError,
    observer::{ConnectionObserver, TypedObserver},
    runner::{ObserverRunner, asynchronous::AsyncRunner, threaded::ThreadedRunner},
};

use crate::integration_tests::common::{
    NetworkDownDetector, arm_and_submit, text_connection,
};

#[test]
fn test_wait_for_returns_when_awaited_data_arrives() {
    let runner: Arc<dyn ObserverRunner> = ThreadedRunner::new();
    let connection = text_connection("awaited");
    let detector = NetworkDownDetector::new("net-down-awaited", &connection);
    detector.state().set_timeout(Duration::from_millis(300));
    let as_dyn: Arc<dyn ConnectionObserver> = detector.clone();

    let started = Instant::now();
    let future = arm_and_submit(&runner, &as_dyn).expect("submit failed");

    let ext_io = {
        let connection = connection.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            connection.data_received(b"ping: sendmsg: Network is unreachable");
        })
    };

    runner
        .wait_for(detector.as_ref(), &future, Some(Duration::from_millis(300)))
        .expect("wait_for failed");
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(90) && elapsed < Duration::from_millis(200),
        "blocking wait should return right after injection, took {elapsed:?}"
    );

    assert!(detector.done());
    assert!(detector.result().is_ok());

    thread::sleep(Duration::from_millis(50));
    assert!(future.done());
    assert!(!future.cancelled());
    assert!(future.exception().is_none());
    assert!(future.result().is_ok());

    ext_io.join().expect("injector thread panicked");
    runner.shutdown();
}

#[test]
fn test_start_and_await_done_round_trip() {
    let threaded = ThreadedRunner::new();
    let runner: Arc<dyn ObserverRunner> = threaded;
    let connection = text_connection("await-done");
    let detector =
        NetworkDownDetector::with_runner("net-down-await-done", &connection, &runner);
    detector.state().set_timeout(Duration::from_millis(300));

    detector.start().expect("start failed");

    let ext_io = {
        let connection = connection.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            connection.data_received(b"ping: sendmsg: Network is unreachable");
        })
    };

    let detected_at = detector
        .await_done(Some(Duration::from_millis(300)))
        .expect("await_done failed");
    assert!(detected_at.elapsed() < Duration::from_millis(200));

    ext_io.join().expect("injector thread panicked");
    runner.shutdown();
}

#[test]
fn test_await_done_before_start_is_wrong_usage() {
    let runner: Arc<dyn ObserverRunner> = ThreadedRunner::new();
    let connection = text_connection("not-started");
    let detector =
        NetworkDownDetector::with_runner("net-down-not-started", &connection, &runner);

    let err = detector
        .await_done(None)
        .expect_err("awaiting a never-started observer must fail");
    assert!(matches!(err, ObserveError::WrongUsage(_)));

    runner.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cooperative_await_completes_on_awaited_data() {
    let runner = AsyncRunner::new().expect("runtime present");
    let runner: Arc<dyn ObserverRunner> = runner;
    let connection = text_connection("async-awaited");
    let detector = NetworkDownDetector::with_runner(
        "net-down-async-awaited",
        &connection,
        &runner,
    );
    detector.state().set_timeout(Duration::from_millis(300));

    detector.start().expect("start failed");

    let injector = {
        let connection = connection.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            connection.data_received(b"ping: sendmsg: Network is unreachable");
        })
    };

    let started = Instant::now();
    let detected_at = detector
        .await_done_async()
        .await
        .expect("cooperative await failed");
    assert!(started.elapsed() < Duration::from_millis(250));
    assert!(detected_at.elapsed() < Duration::from_millis(250));

    injector.await.expect("injector task panicked");
    runner.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_blocking_wait_is_rejected_inside_cooperative_scheduler() {
    let runner = AsyncRunner::new().expect("runtime present");
    let runner: Arc<dyn ObserverRunner> = runner;
    let connection = text_connection("wrong-usage");
    let detector = NetworkDownDetector::with_runner(
        "net-down-wrong-usage",
        &connection,
        &runner,
    );
    let future = detector.start().expect("start failed");

    let err = runner
        .wait_for(detector.as_ref(), &future, None)
        .expect_err("blocking wait inside the scheduler must fail");
    match &err {
        ObserveError::WrongUsage(message) => {
            assert!(
                message.contains("consider using"),
                "hint missing from: {message}"
            );
        },
        other => panic!("expected WrongUsage, got {other:?}"),
    }

    // the observer-level API speaks the same language
    let err = detector
        .await_done(None)
        .expect_err("blocking await inside the scheduler must fail");
    assert!(matches!(err, ObserveError::WrongUsage(_)));

    runner.shutdown();
}
