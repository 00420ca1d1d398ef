//! Nullable random: deterministic byte generation.

use std::collections::VecDeque;
use std::sync::Mutex;
use troof_crypto::{CryptoError, RandomSource};

/// A deterministic [`RandomSource`] for testing.
///
/// Scripted outputs are returned first, one per call (truncated or
/// zero-padded to the requested length). Once the script is exhausted each
/// call fills the buffer with an incrementing counter byte.
pub struct NullRandom {
    script: Mutex<VecDeque<Vec<u8>>>,
    counter: Mutex<u8>,
}

impl NullRandom {
    pub fn new() -> Self {
        Self::scripted(Vec::new())
    }

    /// Create with a sequence of outputs returned in order.
    pub fn scripted(outputs: Vec<Vec<u8>>) -> Self {
        Self {
            script: Mutex::new(outputs.into()),
            counter: Mutex::new(0),
        }
    }

    /// Queue one more scripted output.
    pub fn push(&self, output: Vec<u8>) {
        self.script.lock().unwrap().push_back(output);
    }
}

impl Default for NullRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for NullRandom {
    fn fill_bytes(&self, buf: &mut [u8]) -> Result<(), CryptoError> {
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            buf.fill(0);
            let n = next.len().min(buf.len());
            buf[..n].copy_from_slice(&next[..n]);
            return Ok(());
        }
        let mut counter = self.counter.lock().unwrap();
        *counter = counter.wrapping_add(1);
        buf.fill(*counter);
        Ok(())
    }
}
