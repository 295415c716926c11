// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    pin::Pin,
    sync::{Arc, Mutex, atomic::AtomicBool},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{
    cfg::config::Config,
    errors::Result,
    observer::{ConnectionObserver, state::ObserverStatus},
    runner::{
        DEFAULT_TICK, ObserverFuture, ObserverRunner, ObserverShim, RunnerLifecycle,
        RunnerStatus, admit, ensure_blocking_allowed, tick_until, wait_step,
    },
};

/// Standalone runner: one feeder thread per observer, blocking `wait_for`.
///
/// Works without any event loop, so it is the flavour for plain `fn`
/// callers; the cooperative APIs still function when a tokio runtime is
/// around to poll them.
pub struct ThreadedRunner {
    lifecycle: RunnerLifecycle,
    tick: Duration,
    feeders: Mutex<Vec<Feeder>>,
}

struct Feeder {
    shim: Arc<ObserverShim>,
    thread: thread::JoinHandle<()>,
}

impl ThreadedRunner {
    pub fn new() -> Arc<Self> {
        Self::with_tick(DEFAULT_TICK)
    }

    pub fn with_tick(tick: Duration) -> Arc<Self> {
        Arc::new(Self {
            lifecycle: RunnerLifecycle::running(),
            tick,
            feeders: Mutex::new(Vec::new()),
        })
    }

    pub fn from_config(cfg: &Config) -> Arc<Self> {
        Self::with_tick(cfg.runtime.tick())
    }
}

impl ObserverRunner for ThreadedRunner {
    fn submit(&self, observer: Arc<dyn ConnectionObserver>) -> Result<ObserverFuture> {
        let connection = admit(&self.lifecycle, &observer)?;
        let state = observer.state();
        debug!(observer = %state.name(), connection = %connection.name(), "submitting observer");

        let shim = ObserverShim::install(
            observer.clone(),
            &connection,
            self.lifecycle.shutting_down_flag(),
        );
        let future = ObserverFuture::new(state.name());

        let feeder_observer = observer.clone();
        let feeder_shim = Arc::clone(&shim);
        let feeder_future = future.clone();
        let tick = self.tick;
        let shutting_down = self.lifecycle.shutting_down_flag();
        let thread = thread::Builder::new()
            .name(format!("feeder-{}", state.id()))
            .spawn(move || {
                feed(feeder_observer, feeder_shim, feeder_future, tick, shutting_down);
            })
            .map_err(|e| {
                shim.unsubscribe();
                crate::errors::ObserveError::WrongUsage(format!(
                    "failed to spawn feeder thread: {e}"
                ))
            })?;

        self.feeders
            .lock()
            .expect("feeder list poisoned")
            .push(Feeder { shim, thread });
        Ok(future)
    }

    fn wait_for(
        &self,
        observer: &dyn ConnectionObserver,
        _future: &ObserverFuture,
        timeout: Option<Duration>,
    ) -> Result<()> {
        ensure_blocking_allowed(
            "wait_for()",
            "runner.wait_for_iterator(...).await / observer.await_done_async().await",
        )?;
        let explicit_deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(outcome) = wait_step(observer, explicit_deadline) {
                return outcome;
            }
            thread::sleep(tick_until(self.tick, observer.state(), explicit_deadline));
        }
    }

    fn wait_for_iterator(
        &self,
        observer: Arc<dyn ConnectionObserver>,
        _future: ObserverFuture,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        let tick = self.tick;
        Box::pin(async move {
            loop {
                if let Some(outcome) = wait_step(observer.as_ref(), None) {
                    return outcome;
                }
                tokio::time::sleep(tick_until(tick, observer.state(), None)).await;
            }
        })
    }

    fn shutdown(&self) {
        if !self.lifecycle.begin_shutdown() {
            return;
        }
        debug!("threaded runner shutting down");
        let feeders: Vec<Feeder> = {
            let mut slot = self.feeders.lock().expect("feeder list poisoned");
            slot.drain(..).collect()
        };
        for feeder in &feeders {
            feeder.shim.unsubscribe();
        }
        for feeder in feeders {
            if feeder.thread.join().is_err() {
                warn!("feeder thread panicked during shutdown");
            }
        }
        self.lifecycle.finish_shutdown();
    }

    fn status(&self) -> RunnerStatus {
        self.lifecycle.status()
    }
}

impl Drop for ThreadedRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The timeout watcher: re-reads the observer's timeout every tick so a
/// mutated deadline takes effect live, and exits promptly on any terminal
/// transition or runner shutdown.
fn feed(
    observer: Arc<dyn ConnectionObserver>,
    shim: Arc<ObserverShim>,
    future: ObserverFuture,
    tick: Duration,
    shutting_down: Arc<AtomicBool>,
) {
    let state = observer.state();
    loop {
        if shutting_down.load(std::sync::atomic::Ordering::SeqCst) {
            state.cancel();
            break;
        }
        if state.is_done() {
            break;
        }
        let now = Instant::now();
        match state.deadline() {
            Some(deadline) if now >= deadline => {
                let elapsed = state
                    .start_time()
                    .map(|start| now.duration_since(start))
                    .unwrap_or_default();
                if state.time_out(elapsed) && state.claim_on_timeout() {
                    observer.on_timeout();
                }
                break;
            },
            Some(deadline) => {
                thread::sleep(tick.min(deadline.saturating_duration_since(now)));
            },
            None => thread::sleep(tick),
        }
    }
    shim.unsubscribe();
    if state.status() == ObserverStatus::Cancelled {
        future.cancel();
    } else {
        future.complete();
    }
}
