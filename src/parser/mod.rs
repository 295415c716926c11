// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Line framing on top of the raw text stream an observer receives.
//!
//! A line-oriented observer keeps a [`LineBuffer`] behind a mutex and feeds
//! every `data_received` chunk through it; the buffer yields complete lines
//! (newline stripped) plus the trailing partial, which stays buffered until
//! the next chunk completes it. Classifier chains short-circuit a single
//! line by returning [`ParsingDone`].

/// Control-flow sentinel ending the classifier chain for one line.
///
/// Returned (via `?`) by the first classifier that consumed the line; the
/// dispatching `on_new_line` swallows it and moves on to the next line. It
/// is not an error and must never surface past the dispatch boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsingDone;

/// Outcome of a single classifier; `Err(ParsingDone)` means "line consumed".
pub type ParseResult = std::result::Result<(), ParsingDone>;

/// One piece of framed output: a full line or the trailing partial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedLine {
    pub text: String,
    pub is_full_line: bool,
}

/// Accumulates unfinished text between chunks and splits finished lines.
///
/// Recognises the configured newline sequence and, when that sequence is
/// `"\n"`, also a preceding `"\r"` (network elements mix both). Characters
/// are never dropped: a partial line is dispatched with
/// `is_full_line = false` and retained for the next chunk.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits `pending + chunk` on `newline`; every complete line comes out
    /// first, the trailing partial (if any) last.
    pub fn feed(&mut self, chunk: &str, newline: &str) -> Vec<FramedLine> {
        self.pending.push_str(chunk);

        let mut framed = Vec::new();
        while let Some(pos) = self.pending.find(newline) {
            let mut line: String = self.pending.drain(..pos + newline.len()).collect();
            line.truncate(line.len() - newline.len());
            if newline == "\n" && line.ends_with('\r') {
                line.pop();
            }
            framed.push(FramedLine {
                text: line,
                is_full_line: true,
            });
        }

        if !self.pending.is_empty() {
            framed.push(FramedLine {
                text: self.pending.clone(),
                is_full_line: false,
            });
        }
        framed
    }

    /// Unfinished text carried over to the next chunk.
    pub fn pending(&self) -> &str {
        &self.pending
    }
}
