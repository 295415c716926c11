// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

/// Failure taxonomy of the observation runtime.
///
/// The variants fall into three bands:
/// - user errors (`WrongUsage`, `ResultNotReady`, `RunnerClosed`) are
///   returned at the offending call site and never stored on observers;
/// - observation errors (`Timeout`, `CommandFailure`, `Observation`) are
///   stored on the observer and re-surface from `result()`;
/// - transport errors surface from `send()` only.
///
/// All variants are `Clone` so a stored failure can be handed out on every
/// retrieval without consuming the slot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObserveError {
    /// Outbound IO failed or no transport has been wired yet.
    #[error("transport failure on connection {connection}: {reason}")]
    Transport { connection: String, reason: String },

    /// `result()` was called before the observer reached a terminal state.
    #[error("result of {observer} is not ready yet")]
    ResultNotReady { observer: String },

    /// The observer exceeded its (possibly re-adjusted) timeout.
    #[error("{observer} timed out after {after_millis}ms")]
    Timeout { observer: String, after_millis: u64 },

    /// The observer was cancelled explicitly or by runner/connection
    /// shutdown before producing a result.
    #[error("{observer} was cancelled")]
    Cancelled { observer: String },

    /// Blocking API used where it would stall a cooperative scheduler, or
    /// an observer submitted in an illegal lifecycle state.
    #[error("wrong usage: {0}")]
    WrongUsage(String),

    /// `submit()` on a runner that is no longer accepting observers.
    #[error("runner is closed for new observers")]
    RunnerClosed,

    /// A parser classified device output as a command failure.
    #[error("{observer} command failed: {reason}")]
    CommandFailure { observer: String, reason: String },

    /// Catch-all for failures escaping an observer's `data_received`.
    #[error("{observer} failed: {reason}")]
    Observation { observer: String, reason: String },
}

impl ObserveError {
    /// Millisecond-precision timeout error, avoiding float equality in the
    /// first-wins slot.
    pub fn timeout(observer: &str, after: std::time::Duration) -> Self {
        ObserveError::Timeout {
            observer: observer.to_string(),
            after_millis: after.as_millis() as u64,
        }
    }
}

pub type Result<T> = std::result::Result<T, ObserveError>;
