// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Schedulers coupling observers to their connection for a bounded
//! lifetime.
//!
//! One [`ObserverRunner`] contract, two flavours: [`threaded::ThreadedRunner`]
//! drives each observer from a dedicated feeder thread and blocks in
//! `wait_for`; [`asynchronous::AsyncRunner`] drives feeders as tokio tasks
//! and yields at every tick in `wait_for_iterator`. Observers never depend
//! on which flavour runs them except through the retrieval call they pick.

pub mod asynchronous;
mod shim;
pub mod threaded;

use std::{
    fmt,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    time::{Duration, Instant},
};

pub(crate) use shim::ObserverShim;

use crate::{
    errors::{ObserveError, Result},
    observer::{ConnectionObserver, state::ObserverState},
};

/// Watcher polling period; timeouts resolve within one tick of their
/// deadline and cancellation within two.
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

/// Process-wide runner lifecycle; only `Running` accepts `submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunnerStatus {
    Fresh = 0,
    Running = 1,
    ShuttingDown = 2,
    Down = 3,
}

impl RunnerStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => RunnerStatus::Fresh,
            1 => RunnerStatus::Running,
            2 => RunnerStatus::ShuttingDown,
            _ => RunnerStatus::Down,
        }
    }
}

/// The scheduler contract both flavours fulfil.
pub trait ObserverRunner: Send + Sync + 'static {
    /// Subscribes the observer on its connection (no chunk arriving after
    /// `submit` returns can be missed), arms the timeout watcher and
    /// returns the completion token of the background feeder.
    ///
    /// Preconditions: observer armed and not done (`WrongUsage`), runner
    /// in `Running` (`RunnerClosed`).
    fn submit(&self, observer: Arc<dyn ConnectionObserver>) -> Result<ObserverFuture>;

    /// Blocks until the observer is terminal or the effective deadline
    /// passes. `timeout: None` tracks the observer's own (mutable) timeout
    /// re-read each tick; an explicit timeout counts from now and takes
    /// precedence over later widening of the observer timeout.
    fn wait_for(
        &self,
        observer: &dyn ConnectionObserver,
        future: &ObserverFuture,
        timeout: Option<Duration>,
    ) -> Result<()>;

    /// Cooperative twin of [`wait_for`](Self::wait_for), yielding to the
    /// scheduler at each tick; the deadline is the observer's own timeout.
    fn wait_for_iterator(
        &self,
        observer: Arc<dyn ConnectionObserver>,
        future: ObserverFuture,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;

    /// Stops accepting observers, cancels all live feeders and detaches
    /// every shim. No observer of this runner receives data after the call
    /// returns.
    fn shutdown(&self);

    fn status(&self) -> RunnerStatus;
}

/// Completion token of one submitted observer.
///
/// The future only expresses the feeder's background life: it completes
/// when the feeder exits and may be flagged cancelled. The outcome itself
/// (value or stored failure) lives on the observer and is deliberately
/// never promoted to the future.
#[derive(Clone)]
pub struct ObserverFuture {
    inner: Arc<FutureInner>,
}

struct FutureInner {
    observer_name: String,
    done: AtomicBool,
    cancelled: AtomicBool,
}

impl ObserverFuture {
    pub(crate) fn new(observer_name: &str) -> Self {
        Self {
            inner: Arc::new(FutureInner {
                observer_name: observer_name.to_string(),
                done: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    pub fn done(&self) -> bool {
        self.inner.done.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// `Ok(())` once done; fails only when the future itself was
    /// cancelled. Never carries the observer's value.
    pub fn result(&self) -> Result<()> {
        if self.cancelled() {
            return Err(ObserveError::Cancelled {
                observer: self.inner.observer_name.clone(),
            });
        }
        if self.done() {
            Ok(())
        } else {
            Err(ObserveError::ResultNotReady {
                observer: self.inner.observer_name.clone(),
            })
        }
    }

    /// Always `None`: failures stay on the observer, never on the future.
    pub fn exception(&self) -> Option<ObserveError> {
        None
    }

    pub(crate) fn complete(&self) {
        self.inner.done.store(true, Ordering::SeqCst);
    }

    pub(crate) fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.done.store(true, Ordering::SeqCst);
    }
}

impl fmt::Debug for ObserverFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverFuture")
            .field("observer", &self.inner.observer_name)
            .field("done", &self.done())
            .field("cancelled", &self.cancelled())
            .finish()
    }
}

/// Atomic runner status shared by both flavours.
pub(crate) struct RunnerLifecycle {
    status: AtomicU8,
    shutting_down: Arc<AtomicBool>,
}

impl RunnerLifecycle {
    pub fn running() -> Self {
        Self {
            status: AtomicU8::new(RunnerStatus::Running as u8),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn status(&self) -> RunnerStatus {
        RunnerStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn shutting_down_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutting_down)
    }

    /// Flips the drop-data barrier, then `Running → ShuttingDown`.
    /// Returns false on re-entrant shutdown.
    pub fn begin_shutdown(&self) -> bool {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.status
            .compare_exchange(
                RunnerStatus::Running as u8,
                RunnerStatus::ShuttingDown as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub fn finish_shutdown(&self) {
        self.status.store(RunnerStatus::Down as u8, Ordering::SeqCst);
    }
}

/// Shared `submit` admission: runner must be `Running`, the observer armed
/// and not done, its connection still alive. Marks the observer running.
pub(crate) fn admit(
    lifecycle: &RunnerLifecycle,
    observer: &Arc<dyn ConnectionObserver>,
) -> Result<Arc<crate::connection::observable::ObservableConnection>> {
    if lifecycle.status() != RunnerStatus::Running {
        return Err(ObserveError::RunnerClosed);
    }
    let state = observer.state();
    if state.is_done() {
        return Err(ObserveError::WrongUsage(format!(
            "{} is already done; observers are single-shot",
            state.name()
        )));
    }
    if state.start_time().is_none() {
        return Err(ObserveError::WrongUsage(format!(
            "{} lifetime was not started; arm the observer before submit",
            state.name()
        )));
    }
    let connection = state.connection().ok_or_else(|| {
        ObserveError::WrongUsage(format!(
            "{} lost its connection before submit",
            state.name()
        ))
    })?;
    state.mark_running();
    Ok(connection)
}

/// Best-effort guard against stalling a cooperative scheduler with a
/// blocking wait.
pub(crate) fn ensure_blocking_allowed(api: &str, alternative: &str) -> Result<()> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(ObserveError::WrongUsage(format!(
            "can't call {api} from a cooperative scheduler task - it is a blocking \
             call; consider using: {alternative}"
        )));
    }
    Ok(())
}

/// Deadline the waiting APIs enforce this tick: the observer deadline
/// (start + live timeout), capped by the caller's explicit deadline when
/// one was given.
pub(crate) fn effective_deadline(
    state: &ObserverState,
    explicit: Option<Instant>,
) -> Option<Instant> {
    let observed = state.deadline()?;
    Some(match explicit {
        Some(given) => given.min(observed),
        None => observed,
    })
}

/// One evaluation step shared by the blocking and cooperative waits.
/// `Some(outcome)` ends the wait; `None` means sleep one tick and retry.
pub(crate) fn wait_step(
    observer: &dyn ConnectionObserver,
    explicit_deadline: Option<Instant>,
) -> Option<Result<()>> {
    let state = observer.state();
    let status = state.status();
    if status == crate::observer::state::ObserverStatus::Cancelled {
        return Some(Err(ObserveError::Cancelled {
            observer: state.name().to_string(),
        }));
    }
    if status.is_terminal() {
        return Some(Ok(()));
    }

    let deadline = match effective_deadline(state, explicit_deadline) {
        Some(deadline) => deadline,
        None => {
            return Some(Err(ObserveError::WrongUsage(format!(
                "{} lifetime was never started",
                state.name()
            ))));
        },
    };

    let now = Instant::now();
    if now >= deadline {
        let elapsed = state
            .start_time()
            .map(|start| now.duration_since(start))
            .unwrap_or_default();
        if state.time_out(elapsed) && state.claim_on_timeout() {
            observer.on_timeout();
        }
        // the CAS may have lost to a success/cancel racing in; surface
        // whatever the observer actually ended with
        return Some(state.result_gate());
    }
    None
}

/// How long to sleep before the next evaluation of `wait_step`.
pub(crate) fn tick_until(
    tick: Duration,
    state: &ObserverState,
    explicit_deadline: Option<Instant>,
) -> Duration {
    match effective_deadline(state, explicit_deadline) {
        Some(deadline) => tick.min(deadline.saturating_duration_since(Instant::now())),
        None => tick,
    }
}
