// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Connection observers: single-shot consumers of decoded text that end in
//! exactly one terminal state.
//!
//! A concrete observer embeds an [`state::ObserverState`] and implements
//! [`ConnectionObserver::data_received`]. On success it stores its typed
//! value first (a `OnceLock` works) and then calls `state().succeed()`;
//! the status CAS is the first-wins arbiter, so a racing failure or cancel
//! keeps the slot it won. Observers are not reusable: a runner rejects
//! anything already done or never armed.

/// Lifecycle core and status machine.
pub mod state;
/// Accounting of stored failures nobody read.
pub mod unraised;

use std::{sync::Arc, time::Instant};

use crate::{
    errors::{ObserveError, Result},
    observer::state::ObserverState,
    runner::ObserverFuture,
};

/// The abstract single-shot consumer the runtime schedules.
///
/// `data_received` must not panic; a returned error is stored on the
/// observer by the runner's shim and the observer transitions to failed
/// without affecting other observers on the same connection.
pub trait ConnectionObserver: Send + Sync + 'static {
    /// The embedded shared lifecycle core.
    fn state(&self) -> &ObserverState;

    /// Consumes one decoded chunk; called only while the observer is
    /// non-terminal and its runner is not shutting down.
    fn data_received(&self, data: &str) -> Result<()>;

    /// One-time hook invoked by the runner when the observer times out.
    fn on_timeout(&self) {}

    fn done(&self) -> bool {
        self.state().is_done()
    }

    /// First-wins cancel; a cancelled observer never gets `on_timeout`.
    fn cancel(&self) {
        self.state().cancel();
    }

    /// Arms the lifetime (if the caller did not) and submits the observer
    /// to its attached runner.
    fn start(&self) -> Result<ObserverFuture> {
        let state = self.state();
        let runner = state.runner().ok_or_else(|| {
            ObserveError::WrongUsage(format!(
                "{} has no runner attached; call attach_runner() first",
                state.name()
            ))
        })?;
        if state.start_time().is_none() {
            state.arm(Instant::now());
        }
        let observer = state.self_observer()?;
        let future = runner.submit(observer)?;
        state.store_future(future.clone());
        Ok(future)
    }

    /// Blocking retrieval: waits via the runner, then reads the result.
    ///
    /// Fails with `WrongUsage` when called from inside a cooperative
    /// scheduler, where it would stall the loop; await the observer with
    /// [`await_done_async`](Self::await_done_async) there instead.
    fn await_done(
        &self,
        timeout: Option<std::time::Duration>,
    ) -> Result<<Self as TypedObserver>::Output>
    where
        Self: TypedObserver + Sized,
    {
        let state = self.state();
        let (runner, future) = submitted_pair(state)?;
        let observer = state.self_observer()?;
        runner.wait_for(observer.as_ref(), &future, timeout)?;
        self.result()
    }

    /// Cooperative retrieval: yields to the scheduler at each tick.
    fn await_done_async(
        &self,
    ) -> impl Future<Output = Result<<Self as TypedObserver>::Output>> + Send
    where
        Self: TypedObserver + Sized,
    {
        async {
            let state = self.state();
            let (runner, future) = submitted_pair(state)?;
            let observer = state.self_observer()?;
            runner.wait_for_iterator(observer, future).await?;
            self.result()
        }
    }
}

/// Typed access to the terminal value of a concrete observer.
pub trait TypedObserver: ConnectionObserver {
    type Output;

    /// The stored value for `DoneOk`; `ResultNotReady` before terminal,
    /// re-raises the stored failure after `DoneFail`/`TimedOut`,
    /// `Cancelled` after cancel.
    fn result(&self) -> Result<Self::Output>;
}

/// Wraps a freshly constructed observer and attaches its own `Arc` to the
/// state so `start()`/`await_done()` can re-submit it as a trait object.
pub fn wire_observer<O: ConnectionObserver>(observer: Arc<O>) -> Arc<O> {
    let as_dyn: Arc<dyn ConnectionObserver> = observer.clone();
    observer.state().attach_self(&as_dyn);
    observer
}

fn submitted_pair(
    state: &ObserverState,
) -> Result<(Arc<dyn crate::runner::ObserverRunner>, ObserverFuture)> {
    let runner = state.runner().ok_or_else(|| {
        ObserveError::WrongUsage(format!("{} has no runner attached", state.name()))
    })?;
    let future = state.future().ok_or_else(|| {
        ObserveError::WrongUsage(format!(
            "{} was never started; call start() before awaiting",
            state.name()
        ))
    })?;
    Ok((runner, future))
}
