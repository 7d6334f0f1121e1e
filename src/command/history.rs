//! Fixed-length sample ring for traffic charts.
//!
//! The ring always holds exactly `len` samples. It starts zero-filled, and
//! each push evicts the oldest sample from the front and appends the newest
//! at the back. Memory never grows past the configured length no matter how
//! many status pushes arrive.

use std::collections::VecDeque;

/// Fixed-length FIFO of rate samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRing {
    buf: VecDeque<u64>,
    len: usize,
}

impl SampleRing {
    /// Create a zero-filled ring holding `len` samples.
    ///
    /// # Panics
    ///
    /// Panics if `len == 0`.
    #[must_use]
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "SampleRing length must be > 0");
        Self {
            buf: std::iter::repeat(0).take(len).collect(),
            len,
        }
    }

    /// Append `sample`, dropping the oldest.
    pub fn push(&mut self, sample: u64) {
        if self.buf.len() == self.len {
            self.buf.pop_front();
        }
        self.buf.push_back(sample);
    }

    /// Samples oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u64> {
        self.buf.iter().copied().collect()
    }

    /// Most recent sample.
    #[must_use]
    pub fn latest(&self) -> u64 {
        self.buf.back().copied().unwrap_or_default()
    }

    /// Configured length. Always equal to the number of samples held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Never true; present for API symmetry with collections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reset every sample to zero.
    pub fn clear(&mut self) {
        for sample in &mut self.buf {
            *sample = 0;
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
