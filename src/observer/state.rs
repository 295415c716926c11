// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fmt,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use once_cell::sync::OnceCell;

use crate::{
    connection::observable::ObservableConnection,
    errors::{ObserveError, Result},
    observer::{ConnectionObserver, unraised},
    runner::{ObserverFuture, ObserverRunner},
};

/// Default observer lifetime when no explicit timeout is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Single-shot observer lifecycle.
///
/// `New → Armed → Running → {DoneOk, DoneFail, TimedOut, Cancelled}`;
/// every terminal state is sticky and reached through exactly one
/// compare-and-set, so the first finishing party wins and later attempts
/// are silent no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObserverStatus {
    New = 0,
    Armed = 1,
    Running = 2,
    DoneOk = 3,
    DoneFail = 4,
    TimedOut = 5,
    Cancelled = 6,
}

impl ObserverStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ObserverStatus::DoneOk
                | ObserverStatus::DoneFail
                | ObserverStatus::TimedOut
                | ObserverStatus::Cancelled
        )
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ObserverStatus::New,
            1 => ObserverStatus::Armed,
            2 => ObserverStatus::Running,
            3 => ObserverStatus::DoneOk,
            4 => ObserverStatus::DoneFail,
            5 => ObserverStatus::TimedOut,
            _ => ObserverStatus::Cancelled,
        }
    }
}

/// Shared core every connection observer embeds.
///
/// Holds the non-owning back-links (connection, runner, the observer's own
/// `Arc` for re-submission), the armed start instant, the mutable timeout
/// that feeders re-read every tick, the terminal status, and the stored
/// failure that `result()` re-surfaces.
pub struct ObserverState {
    id: u64,
    name: String,
    connection: Weak<ObservableConnection>,
    self_observer: OnceCell<Weak<dyn ConnectionObserver>>,
    runner: Mutex<Option<Weak<dyn ObserverRunner>>>,
    future: Mutex<Option<ObserverFuture>>,
    status: AtomicU8,
    start_time: Mutex<Option<Instant>>,
    timeout_micros: AtomicU64,
    failure: Mutex<Option<ObserveError>>,
    on_timeout_called: AtomicBool,
}

impl ObserverState {
    pub fn new(name: impl Into<String>, connection: &Arc<ObservableConnection>) -> Self {
        Self {
            id: NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            connection: Arc::downgrade(connection),
            self_observer: OnceCell::new(),
            runner: Mutex::new(None),
            future: Mutex::new(None),
            status: AtomicU8::new(ObserverStatus::New as u8),
            start_time: Mutex::new(None),
            timeout_micros: AtomicU64::new(DEFAULT_TIMEOUT.as_micros() as u64),
            failure: Mutex::new(None),
            on_timeout_called: AtomicBool::new(false),
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.set_timeout(timeout);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> Option<Arc<ObservableConnection>> {
        self.connection.upgrade()
    }

    /// Must be called once right after the observer is wrapped in an `Arc`
    /// (see [`wire_observer`](crate::observer::wire_observer)).
    pub fn attach_self(&self, observer: &Arc<dyn ConnectionObserver>) {
        let _ = self.self_observer.set(Arc::downgrade(observer));
    }

    pub(crate) fn self_observer(&self) -> Result<Arc<dyn ConnectionObserver>> {
        self.self_observer
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| {
                ObserveError::WrongUsage(format!(
                    "{} is not self-attached; construct it through wire_observer()",
                    self.name
                ))
            })
    }

    pub fn attach_runner(&self, runner: &Arc<dyn ObserverRunner>) {
        let mut slot = self.runner.lock().expect("runner slot poisoned");
        *slot = Some(Arc::downgrade(runner));
    }

    pub fn runner(&self) -> Option<Arc<dyn ObserverRunner>> {
        let slot = self.runner.lock().expect("runner slot poisoned");
        slot.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn store_future(&self, future: ObserverFuture) {
        let mut slot = self.future.lock().expect("future slot poisoned");
        *slot = Some(future);
    }

    pub fn future(&self) -> Option<ObserverFuture> {
        self.future.lock().expect("future slot poisoned").clone()
    }

    // ---- timeout field -------------------------------------------------

    /// Current timeout; feeders re-read this every tick, so adjusting it
    /// while the observer runs extends or shortens the deadline live.
    pub fn timeout(&self) -> Duration {
        Duration::from_micros(self.timeout_micros.load(Ordering::SeqCst))
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_micros
            .store(timeout.as_micros() as u64, Ordering::SeqCst);
    }

    // ---- lifetime ------------------------------------------------------

    pub fn start_time(&self) -> Option<Instant> {
        *self.start_time.lock().expect("start_time poisoned")
    }

    /// Starts the observer lifetime (`New → Armed`). Re-arming before
    /// submit just moves the start instant; armed state past `Running` is
    /// left untouched.
    pub fn arm(&self, at: Instant) {
        let current = self.status();
        if matches!(current, ObserverStatus::New | ObserverStatus::Armed) {
            let mut slot = self.start_time.lock().expect("start_time poisoned");
            *slot = Some(at);
            let _ = self.status.compare_exchange(
                ObserverStatus::New as u8,
                ObserverStatus::Armed as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
    }

    pub(crate) fn mark_running(&self) {
        let _ = self.status.compare_exchange(
            ObserverStatus::Armed as u8,
            ObserverStatus::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn status(&self) -> ObserverStatus {
        ObserverStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// Deadline derived from the armed start instant and the live timeout;
    /// `None` until armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.start_time().map(|start| start + self.timeout())
    }

    // ---- terminal transitions (first-wins) -----------------------------

    /// `Running → DoneOk`; the typed result value must already be stored
    /// by the concrete observer before this is called.
    pub fn succeed(&self) -> bool {
        self.try_terminal(ObserverStatus::DoneOk)
    }

    /// Stores `failure` and transitions to `DoneFail`. Loses silently to
    /// any earlier terminal transition.
    pub fn fail(&self, failure: ObserveError) -> bool {
        let mut slot = self.failure.lock().expect("failure slot poisoned");
        if self.try_terminal(ObserverStatus::DoneFail) {
            unraised::register(self.id, &self.name, failure.clone());
            *slot = Some(failure);
            true
        } else {
            false
        }
    }

    /// Timeout transition with a stored `Timeout` failure.
    pub(crate) fn time_out(&self, after: Duration) -> bool {
        let mut slot = self.failure.lock().expect("failure slot poisoned");
        if self.try_terminal(ObserverStatus::TimedOut) {
            let failure = ObserveError::timeout(&self.name, after);
            unraised::register(self.id, &self.name, failure.clone());
            *slot = Some(failure);
            true
        } else {
            false
        }
    }

    /// Explicit cancel or runner/connection shutdown before terminal.
    pub fn cancel(&self) -> bool {
        self.try_terminal(ObserverStatus::Cancelled)
    }

    /// One-time claim of the `on_timeout` hook.
    pub(crate) fn claim_on_timeout(&self) -> bool {
        !self.on_timeout_called.swap(true, Ordering::SeqCst)
    }

    /// Gate every `result()` retrieval goes through: `Ok(())` only for
    /// `DoneOk`; stored failures are cloned out (and marked as raised for
    /// the unraised-failure accounting).
    pub fn result_gate(&self) -> Result<()> {
        match self.status() {
            ObserverStatus::DoneOk => Ok(()),
            ObserverStatus::DoneFail | ObserverStatus::TimedOut => {
                let slot = self.failure.lock().expect("failure slot poisoned");
                unraised::mark_raised(self.id);
                match slot.as_ref() {
                    Some(failure) => Err(failure.clone()),
                    None => Err(ObserveError::Observation {
                        observer: self.name.clone(),
                        reason: "failed without a stored failure".to_string(),
                    }),
                }
            },
            ObserverStatus::Cancelled => Err(ObserveError::Cancelled {
                observer: self.name.clone(),
            }),
            _ => Err(ObserveError::ResultNotReady {
                observer: self.name.clone(),
            }),
        }
    }

    fn try_terminal(&self, to: ObserverStatus) -> bool {
        loop {
            let current = self.status.load(Ordering::SeqCst);
            if ObserverStatus::from_u8(current).is_terminal() {
                return false;
            }
            if self
                .status
                .compare_exchange(current, to as u8, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }
}

impl fmt::Debug for ObserverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverState")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .field("timeout", &self.timeout())
            .finish()
    }
}
