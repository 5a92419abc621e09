//! Interfaces the host environment fulfills for the core: audio transport,
//! durable chunk storage and time. Front ends wire real devices in; tests
//! use the in-memory implementations.

use crate::error::{ModemError, Result};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Playback side of the audio device. `write` blocks until the samples are
/// buffered for output.
pub trait AudioSink {
    fn write(&mut self, samples: &[f32]) -> Result<()>;
}

/// Capture side of the audio device. `read` blocks up to device latency and
/// returns captured samples in order; fewer than `n` means the capture
/// stopped.
pub trait AudioSource {
    fn read(&mut self, n: usize) -> Result<Vec<f32>>;
}

/// Durable store for received chunks, keyed by sequence number. Commits are
/// synchronous; ordering per key is the store's problem, iteration is not
/// offered.
pub trait ChunkStore {
    fn put(&mut self, seq: u32, bytes: &[u8]) -> Result<()>;
    fn get(&self, seq: u32) -> Result<Option<Vec<u8>>>;
    fn clear(&mut self) -> Result<()>;
}

/// Time source for ARQ deadlines and half-duplex turnaround. Abstracted so
/// protocol timing is testable without real sleeps.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation used in production.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Hash-map backed chunk store.
#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: HashMap<u32, Vec<u8>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn put(&mut self, seq: u32, bytes: &[u8]) -> Result<()> {
        self.chunks.insert(seq, bytes.to_vec());
        Ok(())
    }

    fn get(&self, seq: u32) -> Result<Option<Vec<u8>>> {
        Ok(self.chunks.get(&seq).cloned())
    }

    fn clear(&mut self) -> Result<()> {
        self.chunks.clear();
        Ok(())
    }
}

/// Loopback audio pair for tests and offline decoding: everything written
/// to the sink becomes readable from the source.
#[derive(Default)]
pub struct LoopbackAudio {
    buffer: Vec<f32>,
    read_pos: usize,
}

impl LoopbackAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_samples(samples: Vec<f32>) -> Self {
        Self {
            buffer: samples,
            read_pos: 0,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.buffer
    }
}

impl AudioSink for LoopbackAudio {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        self.buffer.extend_from_slice(samples);
        Ok(())
    }
}

impl AudioSource for LoopbackAudio {
    fn read(&mut self, n: usize) -> Result<Vec<f32>> {
        if self.read_pos >= self.buffer.len() {
            return Err(ModemError::Timeout);
        }
        let end = (self.read_pos + n).min(self.buffer.len());
        let out = self.buffer[self.read_pos..end].to_vec();
        self.read_pos = end;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryChunkStore::new();
        store.put(3, &[1, 2, 3]).unwrap();
        assert_eq!(store.get(3).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(store.get(4).unwrap(), None);
        store.clear().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_loopback_audio_ordering() {
        let mut audio = LoopbackAudio::new();
        audio.write(&[1.0, 2.0]).unwrap();
        audio.write(&[3.0]).unwrap();
        assert_eq!(audio.read(2).unwrap(), vec![1.0, 2.0]);
        assert_eq!(audio.read(5).unwrap(), vec![3.0]);
        assert!(audio.read(1).is_err());
    }
}
