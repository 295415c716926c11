// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fmt, sync::Arc};

use bytes::Bytes;

/// A pair of pure transformations between wire bytes and observer text.
///
/// The decoder must consume every chunk it is fed in full; stateful framing
/// (partial lines and such) is the parser layer's job, never the codec's.
#[derive(Clone)]
pub struct Codec {
    encode: Arc<dyn Fn(&str) -> Bytes + Send + Sync>,
    decode: Arc<dyn Fn(&[u8]) -> String + Send + Sync>,
}

impl Codec {
    pub fn new(
        encode: impl Fn(&str) -> Bytes + Send + Sync + 'static,
        decode: impl Fn(&[u8]) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }

    /// UTF-8 passthrough; inbound bytes that are not valid UTF-8 are decoded
    /// lossily rather than dropped.
    pub fn identity() -> Self {
        Self::new(
            |text| Bytes::copy_from_slice(text.as_bytes()),
            |raw| String::from_utf8_lossy(raw).into_owned(),
        )
    }

    pub fn encode(&self, text: &str) -> Bytes {
        (self.encode)(text)
    }

    pub fn decode(&self, raw: &[u8]) -> String {
        (self.decode)(raw)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Codec")
    }
}
