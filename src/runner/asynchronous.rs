// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    pin::Pin,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    cfg::config::Config,
    errors::{ObserveError, Result},
    observer::{ConnectionObserver, state::ObserverStatus},
    runner::{
        DEFAULT_TICK, ObserverFuture, ObserverRunner, ObserverShim, RunnerLifecycle,
        RunnerStatus, admit, ensure_blocking_allowed, tick_until, wait_step,
    },
};

/// Cooperative runner: every feeder is a task on the captured tokio
/// runtime and `wait_for_iterator` yields control at each tick.
///
/// `submit` may be called from any thread; feeders always land on the
/// runtime the runner was built inside. Blocking `wait_for` stays legal
/// from plain threads and is rejected from runtime tasks with a hint at
/// the cooperative alternative.
pub struct AsyncRunner {
    lifecycle: RunnerLifecycle,
    tick: Duration,
    handle: Handle,
    cancel: CancellationToken,
    feeders: Mutex<Vec<Feeder>>,
}

struct Feeder {
    shim: Arc<ObserverShim>,
}

impl AsyncRunner {
    /// Fails with `WrongUsage` outside a tokio runtime.
    pub fn new() -> Result<Arc<Self>> {
        Self::with_tick(DEFAULT_TICK)
    }

    pub fn with_tick(tick: Duration) -> Result<Arc<Self>> {
        let handle = Handle::try_current().map_err(|_| {
            ObserveError::WrongUsage(
                "AsyncRunner must be created inside a running tokio runtime"
                    .to_string(),
            )
        })?;
        Ok(Arc::new(Self {
            lifecycle: RunnerLifecycle::running(),
            tick,
            handle,
            cancel: CancellationToken::new(),
            feeders: Mutex::new(Vec::new()),
        }))
    }

    pub fn from_config(cfg: &Config) -> Result<Arc<Self>> {
        Self::with_tick(cfg.runtime.tick())
    }
}

impl ObserverRunner for AsyncRunner {
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
        let cancel = self.cancel.child_token();
        let _ = self.handle.spawn(async move {
            feed(feeder_observer, feeder_shim, feeder_future, tick, cancel).await;
        });

        self.feeders
            .lock()
            .expect("feeder list poisoned")
            .push(Feeder { shim });
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

    /// Synchronous part of the teardown: after this returns no observer of
    /// this runner sees data; feeders notice the cancelled token within a
    /// tick and finish in the background.
    fn shutdown(&self) {
        if !self.lifecycle.begin_shutdown() {
            return;
        }
        debug!("async runner shutting down");
        let feeders: Vec<Feeder> = {
            let mut slot = self.feeders.lock().expect("feeder list poisoned");
            slot.drain(..).collect()
        };
        for feeder in &feeders {
            feeder.shim.unsubscribe();
        }
        self.cancel.cancel();
        self.lifecycle.finish_shutdown();
    }

    fn status(&self) -> RunnerStatus {
        self.lifecycle.status()
    }
}

impl Drop for AsyncRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn feed(
    observer: Arc<dyn ConnectionObserver>,
    shim: Arc<ObserverShim>,
    future: ObserverFuture,
    tick: Duration,
    cancel: CancellationToken,
) {
    let state = observer.state();
    loop {
        if cancel.is_cancelled() {
            state.cancel();
            break;
        }
        if state.is_done() {
            break;
        }
        let now = Instant::now();
        let sleep_for = match state.deadline() {
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
            Some(deadline) => tick.min(deadline.saturating_duration_since(now)),
            None => tick,
        };
        tokio::select! {
            _ = cancel.cancelled() => {
                state.cancel();
                break;
            },
            _ = tokio::time::sleep(sleep_for) => {},
        }
    }
    shim.unsubscribe();
    if state.status() == ObserverStatus::Cancelled {
        future.cancel();
    } else {
        future.complete();
    }
}
