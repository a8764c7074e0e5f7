//! Pre-warm buffer (§4.5 "Pre-warmer contract", §9 "Pre-warming").
//!
//! A short-lived producer pushes the first chunks of the *next* playout
//! item into a bounded ring ahead of time, so a client that attaches
//! right as the advancer starts that item gets a sub-second first byte
//! instead of waiting on a cold FFmpeg spawn. The buffer is read once,
//! in full, by whichever client drains it first; it is never shared
//! across two clients.

use std::sync::Mutex;

use bytes::Bytes;

const MAX_CHUNKS: usize = 20;
const MAX_BYTES: usize = 5 * 1024 * 1024;
const PREFILL_CHUNK_TARGET: usize = 10;

#[derive(Default)]
struct Inner {
    chunks: Vec<Bytes>,
    bytes: usize,
    drained: bool,
}

/// One per "next item" prefetch. The broadcaster creates a fresh one
/// before starting the pre-warmer task for the upcoming item and
/// discards it once the advancer actually begins streaming that item
/// (whether or not a client ever drained it).
pub struct PreWarmBuffer {
    inner: Mutex<Inner>,
}

impl PreWarmBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Push a chunk produced by the pre-warmer's own transcode process.
    /// Returns `false` once a bound is hit, telling the caller to stop
    /// pulling from FFmpeg for this prefetch.
    pub fn push(&self, chunk: Bytes) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.drained || inner.chunks.len() >= MAX_CHUNKS || inner.bytes >= MAX_BYTES {
            return false;
        }
        inner.bytes += chunk.len();
        inner.chunks.push(chunk);
        inner.chunks.len() < PREFILL_CHUNK_TARGET && inner.bytes < MAX_BYTES
    }

    /// Drain the whole buffer for a newly-attached client. Idempotent:
    /// a second caller sees an empty buffer because `drained` latches
    /// after the first non-empty drain, matching "buffers are not
    /// shared across clients once drained" (§4.5).
    pub fn drain(&self) -> Vec<Bytes> {
        let mut inner = self.inner.lock().unwrap();
        if inner.drained {
            return Vec::new();
        }
        inner.drained = true;
        std::mem::take(&mut inner.chunks)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().chunks.is_empty()
    }
}

impl Default for PreWarmBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_is_read_once() {
        let buf = PreWarmBuffer::new();
        buf.push(Bytes::from_static(b"a"));
        buf.push(Bytes::from_static(b"b"));
        let first = buf.drain();
        assert_eq!(first.len(), 2);
        let second = buf.drain();
        assert!(second.is_empty());
    }

    #[test]
    fn push_stops_accepting_past_chunk_cap() {
        let buf = PreWarmBuffer::new();
        for _ in 0..MAX_CHUNKS {
            buf.push(Bytes::from_static(b"x"));
        }
        assert!(!buf.push(Bytes::from_static(b"x")));
    }
}
