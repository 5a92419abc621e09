use crate::error::{ModemError, Result};

/// Fixed-capacity sample ring addressed by absolute stream position.
///
/// The audio input appends; the scanner reads by the monotonic global
/// sample counter. Asking for a range that has already been overwritten
/// fails with `Overrun` instead of returning stale data.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Vec<f64>,
    cap: usize,
    total_written: u64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity],
            cap: capacity,
            total_written: 0,
        }
    }

    /// Absolute position one past the newest sample.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn write(&mut self, samples: &[f64]) {
        let full_len = samples.len();
        // Only the newest `cap` samples of an oversized block can survive.
        let skipped = full_len.saturating_sub(self.cap);
        let tail = &samples[skipped..];

        let pos = ((self.total_written + skipped as u64) % self.cap as u64) as usize;
        let n = tail.len();
        let end = pos + n;
        if end <= self.cap {
            self.buf[pos..end].copy_from_slice(tail);
        } else {
            let first = self.cap - pos;
            self.buf[pos..].copy_from_slice(&tail[..first]);
            self.buf[..end - self.cap].copy_from_slice(&tail[first..]);
        }

        self.total_written += full_len as u64;
    }

    /// Absolute `[start, end)` range still held in the buffer.
    pub fn available_range(&self) -> (u64, u64) {
        let end = self.total_written;
        (end.saturating_sub(self.cap as u64), end)
    }

    /// Copy `length` samples starting at absolute position `start`.
    pub fn read(&self, start: u64, length: usize) -> Result<Vec<f64>> {
        let end = start + length as u64;
        let (keep_start, keep_end) = self.available_range();
        if start < keep_start {
            return Err(ModemError::Overrun);
        }
        if end > keep_end {
            return Err(ModemError::InsufficientData);
        }

        let start_idx = (start % self.cap as u64) as usize;
        let end_idx = (end % self.cap as u64) as usize;
        if start_idx < end_idx || length == 0 {
            Ok(self.buf[start_idx..start_idx + length].to_vec())
        } else {
            let mut out = Vec::with_capacity(length);
            out.extend_from_slice(&self.buf[start_idx..]);
            out.extend_from_slice(&self.buf[..end_idx]);
            debug_assert_eq!(out.len(), length);
            Ok(out)
        }
    }
}
