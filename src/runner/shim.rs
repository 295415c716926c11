// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

use once_cell::sync::OnceCell;
use tracing::trace;

use crate::{
    connection::{
        observable::ObservableConnection,
        subscription::{ConnectionSubscriber, SubscriptionKey},
    },
    observer::ConnectionObserver,
};

/// The adapter a runner installs as the actual subscriber of an observer.
///
/// It secures the observer against late data (terminal observers and
/// shutting-down runners see nothing), routes `data_received` failures
/// into the observer's failure slot, and detaches from the connection on
/// any terminal transition. The connection only holds this shim weakly;
/// the owning feeder keeps it alive.
pub(crate) struct ObserverShim {
    observer: Arc<dyn ConnectionObserver>,
    connection: Weak<ObservableConnection>,
    shutting_down: Arc<AtomicBool>,
    key: OnceCell<SubscriptionKey>,
    unsubscribed: AtomicBool,
}

impl ObserverShim {
    /// Builds the shim and subscribes it before returning, so no chunk
    /// arriving after `submit` can be missed.
    pub fn install(
        observer: Arc<dyn ConnectionObserver>,
        connection: &Arc<ObservableConnection>,
        shutting_down: Arc<AtomicBool>,
    ) -> Arc<Self> {
        let shim = Arc::new(Self {
            observer,
            connection: Arc::downgrade(connection),
            shutting_down,
            key: OnceCell::new(),
            unsubscribed: AtomicBool::new(false),
        });
        let _ = shim.key.set(SubscriptionKey::of(&shim));
        connection.subscribe(&shim);
        shim
    }

    /// Idempotent detach from the connection.
    pub fn unsubscribe(&self) {
        if self.unsubscribed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let (Some(connection), Some(key)) =
            (self.connection.upgrade(), self.key.get())
        {
            connection.unsubscribe_key(*key);
        }
    }
}

impl ConnectionSubscriber for ObserverShim {
    fn on_data(&self, data: &str) {
        if self.shutting_down.load(Ordering::SeqCst) || self.observer.state().is_done()
        {
            trace!(
                observer = %self.observer.state().name(),
                "dropping data for secured observer"
            );
            return;
        }
        if let Err(failure) = self.observer.data_received(data) {
            self.observer.state().fail(failure);
        }
        if self.observer.state().is_done() {
            self.unsubscribe();
        }
    }

    fn on_connection_closed(&self) {
        self.observer.state().cancel();
    }
}
