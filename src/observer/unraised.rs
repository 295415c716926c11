// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Process-wide accounting of observer failures nobody read.
//!
//! Every failure stored on an observer lands here until some `result()`
//! call surfaces it. A test harness drains the registry at teardown to
//! assert no failure went unnoticed.

use std::{collections::HashMap, sync::Mutex};

use once_cell::sync::Lazy;

use crate::errors::ObserveError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnraisedFailure {
    pub observer: String,
    pub error: ObserveError,
}

static REGISTRY: Lazy<Mutex<HashMap<u64, UnraisedFailure>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub(crate) fn register(observer_id: u64, observer: &str, error: ObserveError) {
    let mut registry = REGISTRY.lock().expect("unraised registry poisoned");
    registry.insert(
        observer_id,
        UnraisedFailure {
            observer: observer.to_string(),
            error,
        },
    );
}

pub(crate) fn mark_raised(observer_id: u64) {
    let mut registry = REGISTRY.lock().expect("unraised registry poisoned");
    registry.remove(&observer_id);
}

/// Number of stored failures still unread.
pub fn unraised_count() -> usize {
    REGISTRY.lock().expect("unraised registry poisoned").len()
}

/// Returns and clears every failure still unread.
pub fn drain_unraised() -> Vec<UnraisedFailure> {
    let mut registry = REGISTRY.lock().expect("unraised registry poisoned");
    registry.drain().map(|(_, failure)| failure).collect()
}
