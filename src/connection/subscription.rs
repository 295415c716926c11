// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{Arc, Weak};

/// Receiving side of the inbound fan-out.
///
/// Implementors get every decoded chunk through `on_data` and a one-shot
/// `on_connection_closed` when the connection shuts down. The connection
/// stores subscribers weakly: dropping the last strong reference silently
/// unsubscribes.
pub trait ConnectionSubscriber: Send + Sync + 'static {
    fn on_data(&self, data: &str);

    fn on_connection_closed(&self);
}

/// Sentinel subject identity for closure subscribers.
const FREE_SUBJECT: usize = 0;

/// Registry key separating subject identity from callback identity.
///
/// The same subscriber registered twice collapses to one subscription,
/// while the same callback code reached from two distinct subjects yields
/// two. Subject identity is the `Arc` data address; callback identity is
/// the address of the monomorphized `on_data` for that subject type (the
/// sentinel pair for free closures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    subject: usize,
    callback: usize,
}

impl SubscriptionKey {
    pub fn of<S: ConnectionSubscriber>(subject: &Arc<S>) -> Self {
        Self {
            subject: Arc::as_ptr(subject) as usize,
            callback: (S::on_data as fn(&S, &str)) as usize,
        }
    }

    pub fn of_free(subscriber: &Arc<FreeSubscriber>) -> Self {
        Self {
            subject: FREE_SUBJECT,
            callback: Arc::as_ptr(subscriber) as usize,
        }
    }
}

/// Closure-based subscriber for callers without a subject object.
pub struct FreeSubscriber {
    on_data: Box<dyn Fn(&str) + Send + Sync>,
    on_close: Box<dyn Fn() + Send + Sync>,
}

impl FreeSubscriber {
    pub fn new(
        on_data: impl Fn(&str) + Send + Sync + 'static,
        on_close: impl Fn() + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            on_data: Box::new(on_data),
            on_close: Box::new(on_close),
        })
    }
}

impl ConnectionSubscriber for FreeSubscriber {
    fn on_data(&self, data: &str) {
        (self.on_data)(data);
    }

    fn on_connection_closed(&self) {
        (self.on_close)();
    }
}

/// What the registry actually holds: a weak delivery path.
#[derive(Clone)]
pub(crate) struct SubscriptionEntry {
    pub subscriber: Weak<dyn ConnectionSubscriber>,
}

impl SubscriptionEntry {
    pub fn new(subscriber: Weak<dyn ConnectionSubscriber>) -> Self {
        Self { subscriber }
    }
}
