// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fmt,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use dashmap::DashMap;
use rand::RngExt;
use tracing::{debug, info, trace, warn};

use crate::{
    codec::Codec,
    connection::subscription::{
        ConnectionSubscriber, FreeSubscriber, SubscriptionEntry, SubscriptionKey,
    },
    errors::{ObserveError, Result},
};

/// Outbound IO callable installed by the external transport.
pub type SendFn = Box<dyn Fn(&Bytes) -> anyhow::Result<()> + Send + Sync>;

/// Construction-time knobs; everything has a usable default.
pub struct ConnectionOptions {
    /// Connection name; autogenerated as `<prefix>-<hex4>` when `None`.
    pub name: Option<String>,
    pub name_prefix: String,
    pub newline: String,
    pub codec: Codec,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            name: None,
            name_prefix: "conn".to_string(),
            newline: "\n".to_string(),
            codec: Codec::identity(),
        }
    }
}

impl ConnectionOptions {
    pub fn from_config(cfg: &crate::cfg::config::Config) -> Self {
        Self {
            name: None,
            name_prefix: cfg.connection.name_prefix.clone(),
            newline: cfg.connection.newline.clone(),
            codec: Codec::identity(),
        }
    }
}

/// The bidirectional text-stream endpoint with fan-out of inbound data.
///
/// Outbound: `send()` encodes via the codec and hands bytes to the wired
/// transport callable. Inbound: the transport calls `data_received()` for
/// every chunk; the connection decodes it and notifies a snapshot of the
/// currently live subscribers. Subscribers are held weakly, so forgetting
/// an observer silently unsubscribes it.
pub struct ObservableConnection {
    name: String,
    newline: String,
    codec: Codec,
    how2send: Mutex<Option<SendFn>>,
    subscribers: DashMap<SubscriptionKey, SubscriptionEntry>,
    open: AtomicBool,
    closing: AtomicBool,
}

impl ObservableConnection {
    pub fn new() -> Arc<Self> {
        Self::with_options(ConnectionOptions::default())
    }

    pub fn with_options(opts: ConnectionOptions) -> Arc<Self> {
        let name = opts.name.unwrap_or_else(|| {
            format!("{}-{:04x}", opts.name_prefix, rand::rng().random::<u16>())
        });
        Arc::new(Self {
            name,
            newline: opts.newline,
            codec: opts.codec,
            how2send: Mutex::new(None),
            subscribers: DashMap::new(),
            open: AtomicBool::new(true),
            closing: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Newline sequence line-oriented observers should split on.
    pub fn newline(&self) -> &str {
        &self.newline
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Installs (or replaces) the outbound IO callable.
    pub fn wire_sender(
        &self,
        how2send: impl Fn(&Bytes) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        let mut slot = self.how2send.lock().expect("transport slot poisoned");
        *slot = Some(Box::new(how2send));
    }

    /// Encodes and transmits `text`; transport problems surface here and
    /// never touch the inbound path.
    pub fn send(&self, text: &str) -> Result<()> {
        let payload = self.codec.encode(text);
        debug!(connection = %self.name, data = %text, "sending");
        let slot = self.how2send.lock().expect("transport slot poisoned");
        match slot.as_ref() {
            None => Err(ObserveError::Transport {
                connection: self.name.clone(),
                reason: "no transport wired".to_string(),
            }),
            Some(how2send) => {
                how2send(&payload).map_err(|e| ObserveError::Transport {
                    connection: self.name.clone(),
                    reason: e.to_string(),
                })
            },
        }
    }

    /// Incoming-IO API: the external transport calls this for every chunk.
    ///
    /// Logged once at raw level (hex) and once at info level after decode,
    /// then fanned out to a snapshot of subscribers. Silently dropped when
    /// the connection is closed.
    pub fn data_received(&self, raw: &[u8]) {
        if !self.is_open() {
            return;
        }
        trace!(target: "linewatch_rs::raw", connection = %self.name, raw = %hex::encode(raw), "received");
        let decoded = self.codec.decode(raw);
        info!(connection = %self.name, data = %decoded, "received");
        self.notify_subscribers(&decoded);
    }

    /// Subscribe for data-received notification; idempotent per key.
    pub fn subscribe<S: ConnectionSubscriber>(&self, subject: &Arc<S>) {
        self.install(
            SubscriptionKey::of(subject),
            Arc::downgrade(subject) as Weak<dyn ConnectionSubscriber>,
        );
    }

    /// Closure flavour of [`subscribe`](Self::subscribe); the caller keeps
    /// the returned-by-`FreeSubscriber::new` strong reference alive.
    pub fn subscribe_free(&self, subscriber: &Arc<FreeSubscriber>) {
        self.install(
            SubscriptionKey::of_free(subscriber),
            Arc::downgrade(subscriber) as Weak<dyn ConnectionSubscriber>,
        );
    }

    pub fn unsubscribe<S: ConnectionSubscriber>(&self, subject: &Arc<S>) {
        self.unsubscribe_key(SubscriptionKey::of(subject));
    }

    pub fn unsubscribe_free(&self, subscriber: &Arc<FreeSubscriber>) {
        self.unsubscribe_key(SubscriptionKey::of_free(subscriber));
    }

    pub(crate) fn unsubscribe_key(&self, key: SubscriptionKey) {
        trace!(connection = %self.name, ?key, "unsubscribe");
        if self.subscribers.remove(&key).is_none() {
            warn!(connection = %self.name, ?key, "unsubscribe of a not-subscribed key");
        }
    }

    /// Closes the connection, notifying every subscriber exactly once
    /// before `is_open()` flips to false. Re-entrant shutdown is a no-op.
    pub fn shutdown(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(connection = %self.name, "shutting down");
        let snapshot: Vec<SubscriptionEntry> = self
            .subscribers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.subscribers.clear();
        for entry in snapshot {
            if let Some(subscriber) = entry.subscriber.upgrade() {
                subscriber.on_connection_closed();
            }
        }
        self.open.store(false, Ordering::SeqCst);
    }

    fn install(&self, key: SubscriptionKey, subscriber: Weak<dyn ConnectionSubscriber>) {
        use dashmap::mapref::entry::Entry;

        trace!(connection = %self.name, ?key, "subscribe");
        match self.subscribers.entry(key) {
            Entry::Vacant(vacant) => {
                vacant.insert(SubscriptionEntry::new(subscriber));
            },
            Entry::Occupied(mut occupied) => {
                // a dead weak entry under the same key is replaced, a live
                // one makes the install idempotent
                if occupied.get().subscriber.strong_count() == 0 {
                    occupied.insert(SubscriptionEntry::new(subscriber));
                }
            },
        }
    }

    /// Fan-out of one decoded chunk. The snapshot is taken before delivery
    /// so subscribers may re-enter subscribe/unsubscribe freely; weakly
    /// collected entries are skipped and pruned.
    fn notify_subscribers(&self, decoded: &str) {
        let snapshot: Vec<(SubscriptionKey, SubscriptionEntry)> = self
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (key, entry) in snapshot {
            match entry.subscriber.upgrade() {
                Some(subscriber) => {
                    trace!(connection = %self.name, ?key, "notifying");
                    subscriber.on_data(decoded);
                },
                None => {
                    self.subscribers.remove(&key);
                },
            }
        }
    }
}

impl fmt::Debug for ObservableConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableConnection")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
