//! Real-time streaming receiver.
//!
//! One instance rides a free-running capture stream: audio blocks are
//! DC-cleaned into a ring buffer, a running auto-correlation hunts for the
//! Schmidl-Cox preamble, each detected frame is refined, collected,
//! demodulated and routed by its tag byte to the metadata, data-chunk or
//! legacy parser. A single bad frame never ends the session; it bumps a
//! counter and scanning resumes right after the failed frame.

use crate::assembler::{ChunkAssembler, SessionOutcome};
use crate::bits::{bits_to_bytes, majority_vote};
use crate::chunking::{DataChunk, FileMetadata, LegacyPacket};
use crate::error::{ModemError, Result};
use crate::host::{ChunkStore, MemoryChunkStore};
use crate::ofdm::OfdmDemodulator;
use crate::profile::{ModemMode, OfdmProfile};
use crate::ring::RingBuffer;
use crate::signal::{normalize_peak, to_f64, DcBlocker, TARGET_PEAK};
use crate::sync::{cross_correlate_fine, CoarseScanner, PreambleGenerator, FINE_THRESHOLD};
use crate::{INITIAL_PAYLOAD_BYTES, TAG_DATA_CHUNK, TAG_METADATA};
use rustfft::num_complex::Complex;
use tracing::{debug, info, warn};

/// Progress notifications surfaced by `feed`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// A good metadata frame opened (or reopened) a chunked session.
    Metadata {
        name: String,
        total_chunks: u32,
        chunk_size: u16,
        total_file_size: u32,
    },
    /// A data chunk arrived; `crc_ok` reports whether it was stored.
    Chunk { seq: u32, crc_ok: bool },
    /// All chunks arrived; the reassembled file.
    Complete { name: String, data: Vec<u8> },
    /// A legacy single-shot packet arrived.
    LegacyFile {
        name: String,
        data: Vec<u8>,
        crc_valid: bool,
    },
}

enum ScanState {
    /// Sliding the coarse auto-correlation window.
    Idle,
    /// Coarse hit at `candidate`; waiting for enough samples to refine.
    PreambleDetected { candidate: u64 },
    /// Frame located; waiting for `expected_end` samples to arrive.
    CollectingFrame { frame_start: u64, expected_end: u64 },
}

pub struct StreamingReceiver {
    mode: ModemMode,
    profile: &'static OfdmProfile,
    ring: RingBuffer,
    dc: DcBlocker,
    scanner: CoarseScanner,
    state: ScanState,
    p1_template: Vec<f64>,
    ce_known: Vec<Complex<f64>>,
    demodulator: OfdmDemodulator,
    assembler: Option<ChunkAssembler>,
    idle_store: Option<Box<dyn ChunkStore>>,
    /// Byte budget used to predict frame length; 280 until metadata
    /// announces the chunk size.
    payload_bytes: usize,
    frame_errors: u64,
}

impl StreamingReceiver {
    /// Receiver with an in-memory chunk store.
    pub fn new(mode: ModemMode) -> Result<Self> {
        Self::with_store(mode, Box::new(MemoryChunkStore::new()))
    }

    /// Receiver persisting chunks into the host-provided store.
    pub fn with_store(mode: ModemMode, store: Box<dyn ChunkStore>) -> Result<Self> {
        let profile = mode.profile();
        let mut generator = PreambleGenerator::new(profile);
        let (p1, _) = generator.schmidl_cox()?;
        let (_, ce_known) = generator.channel_estimation()?;

        // Three frames at the largest payload budget, plus slack for the
        // inter-frame gaps the scanner crosses.
        let max_payload = INITIAL_PAYLOAD_BYTES
            .max(mode.chunk_size() + crate::DATA_CHUNK_OVERHEAD);
        let max_frame = (3 + profile.symbols_for_payload(
            max_payload,
            mode.modulation(),
            mode.repetition(),
        )) * profile.symbol_len();
        let capacity = 3 * max_frame + 8 * profile.symbol_len();

        Ok(Self {
            mode,
            profile,
            ring: RingBuffer::new(capacity),
            dc: DcBlocker::new(),
            scanner: CoarseScanner::new(profile.fft_size, 0),
            state: ScanState::Idle,
            p1_template: p1,
            ce_known,
            demodulator: OfdmDemodulator::new(profile, mode.modulation()),
            assembler: None,
            idle_store: Some(store),
            payload_bytes: INITIAL_PAYLOAD_BYTES,
            frame_errors: 0,
        })
    }

    /// Append a captured block and run the scanner as far as it can go.
    /// Returns every event the new samples produced. Only host storage
    /// failures surface as errors; bad frames are counted and skipped.
    pub fn feed(&mut self, samples: &[f32]) -> Result<Vec<ReceiverEvent>> {
        let cleaned = self.dc.process(&to_f64(samples));
        self.ring.write(&cleaned);

        let mut events = Vec::new();
        loop {
            let progressed = self.step(&mut events)?;
            if !progressed {
                break;
            }
        }
        Ok(events)
    }

    /// Frames that failed demodulation, parsing or channel estimation.
    pub fn frame_errors(&self) -> u64 {
        self.frame_errors
    }

    /// CRC-failed chunks seen by the current session.
    pub fn chunk_crc_errors(&self) -> u64 {
        self.assembler.as_ref().map_or(0, |a| a.crc_errors())
    }

    /// Chunks stored so far in the current session.
    pub fn chunks_received(&self) -> u32 {
        self.assembler.as_ref().map_or(0, |a| a.received_count())
    }

    /// Tear the session down, delivering whatever arrived.
    pub fn finish(mut self) -> SessionOutcome {
        match self.assembler.take() {
            Some(assembler) => assembler.finish(),
            None => SessionOutcome::Aborted("no metadata received".into()),
        }
    }

    /// Run one state transition. Returns false when nothing more can move
    /// without new samples.
    fn step(&mut self, events: &mut Vec<ReceiverEvent>) -> Result<bool> {
        match self.state {
            ScanState::Idle => self.step_scan(),
            ScanState::PreambleDetected { candidate } => self.step_refine(candidate),
            ScanState::CollectingFrame {
                frame_start,
                expected_end,
            } => self.step_collect(frame_start, expected_end, events),
        }
    }

    fn step_scan(&mut self) -> Result<bool> {
        let (avail_start, avail_end) = self.ring.available_range();
        let start = self.scanner.position().max(avail_start);
        if start >= avail_end {
            return Ok(false);
        }

        let window = self.ring.read(start, (avail_end - start) as usize)?;
        if let Some((pos, metric)) = self.scanner.scan(&window, start) {
            debug!(pos, metric, "coarse preamble detected");
            self.state = ScanState::PreambleDetected { candidate: pos };
            return Ok(true);
        }
        Ok(false)
    }

    fn step_refine(&mut self, candidate: u64) -> Result<bool> {
        let radius = (3 * self.profile.cp_len) as u64;
        let template_len = self.p1_template.len() as u64;
        let needed_end = candidate + radius + template_len;
        if self.ring.total_written() < needed_end {
            return Ok(false);
        }

        let (avail_start, _) = self.ring.available_range();
        if avail_start > candidate {
            // The candidate was overwritten while we waited.
            self.frame_errors += 1;
            self.abandon_candidate(candidate);
            return Ok(true);
        }
        let seg_start = candidate.saturating_sub(radius).max(avail_start);
        let seg = match self
            .ring
            .read(seg_start, (needed_end - seg_start) as usize)
        {
            Ok(seg) => seg,
            Err(_) => {
                self.frame_errors += 1;
                self.abandon_candidate(candidate);
                return Ok(true);
            }
        };

        let center = (candidate - seg_start) as usize;
        let fine = cross_correlate_fine(&seg, &self.p1_template, center, radius as usize);
        match fine {
            Some((offset, corr)) if corr > FINE_THRESHOLD => {
                let frame_start = seg_start + offset as u64;
                let data_symbols = self.profile.symbols_for_payload(
                    self.payload_bytes,
                    self.mode.modulation(),
                    self.mode.repetition(),
                );
                let frame_len = ((3 + data_symbols) * self.profile.symbol_len()) as u64;
                let expected_end = frame_start + frame_len;
                debug!(frame_start, expected_end, corr, "frame aligned");
                self.state = ScanState::CollectingFrame {
                    frame_start,
                    expected_end,
                };
            }
            _ => {
                debug!(candidate, "fine alignment failed, resuming scan");
                self.abandon_candidate(candidate);
            }
        }
        Ok(true)
    }

    fn step_collect(
        &mut self,
        frame_start: u64,
        expected_end: u64,
        events: &mut Vec<ReceiverEvent>,
    ) -> Result<bool> {
        if self.ring.total_written() < expected_end {
            return Ok(false);
        }

        let slice = self
            .ring
            .read(frame_start, (expected_end - frame_start) as usize);
        match slice {
            Ok(mut slice) => {
                // Independent per-frame gain.
                normalize_peak(&mut slice, TARGET_PEAK);
                if let Err(e) = self.demodulate_frame(&slice, events) {
                    if matches!(e, ModemError::Store(_)) {
                        return Err(e);
                    }
                    self.frame_errors += 1;
                    warn!(frame_start, error = %e, "frame discarded");
                }
            }
            Err(_) => {
                self.frame_errors += 1;
                warn!(frame_start, "frame overwritten before demodulation");
            }
        }

        // Win or lose, scanning resumes after this frame.
        self.scanner.reset(expected_end);
        self.state = ScanState::Idle;
        Ok(true)
    }

    fn abandon_candidate(&mut self, candidate: u64) {
        self.scanner
            .reset(candidate + self.profile.symbol_len() as u64);
        self.state = ScanState::Idle;
    }

    fn demodulate_frame(
        &mut self,
        slice: &[f64],
        events: &mut Vec<ReceiverEvent>,
    ) -> Result<()> {
        let symbol_len = self.profile.symbol_len();

        let ce = &slice[2 * symbol_len..3 * symbol_len];
        self.demodulator
            .estimate_channel_from_symbol(ce, &self.ce_known)?;

        let bits = self.demodulator.demodulate(&slice[3 * symbol_len..])?;
        let bytes = bits_to_bytes(&majority_vote(&bits, self.mode.repetition()));
        if bytes.is_empty() {
            return Err(ModemError::InsufficientData);
        }

        match bytes[0] {
            TAG_METADATA => self.on_metadata(&bytes, events)?,
            TAG_DATA_CHUNK => self.on_chunk(&bytes, events)?,
            _ => self.on_legacy(&bytes, events)?,
        }
        Ok(())
    }

    fn on_metadata(&mut self, bytes: &[u8], events: &mut Vec<ReceiverEvent>) -> Result<()> {
        let (meta, crc_ok) = FileMetadata::decode(bytes)?;
        if !crc_ok {
            return Err(ModemError::CrcMismatch);
        }

        info!(
            name = %meta.name,
            total_chunks = meta.total_chunks,
            chunk_size = meta.chunk_size,
            "metadata received"
        );
        events.push(ReceiverEvent::Metadata {
            name: meta.name.clone(),
            total_chunks: meta.total_chunks,
            chunk_size: meta.chunk_size,
            total_file_size: meta.total_file_size,
        });

        // A fresh announcement always restarts assembly; the store is
        // cleared of anything a previous session left behind.
        let store = match self.assembler.take() {
            Some(old) => old.into_store(),
            None => self
                .idle_store
                .take()
                .unwrap_or_else(|| Box::new(MemoryChunkStore::new())),
        };
        self.payload_bytes = meta.chunk_size as usize + crate::DATA_CHUNK_OVERHEAD;
        self.assembler = Some(ChunkAssembler::new(meta, store)?);
        Ok(())
    }

    fn on_chunk(&mut self, bytes: &[u8], events: &mut Vec<ReceiverEvent>) -> Result<()> {
        let (chunk, crc_ok) = DataChunk::decode(bytes)?;
        let seq = chunk.seq;

        let Some(assembler) = self.assembler.as_mut() else {
            warn!(seq, "chunk before metadata, dropped");
            return Err(ModemError::Format("data chunk before metadata".into()));
        };

        assembler.accept(&chunk, crc_ok)?;
        events.push(ReceiverEvent::Chunk { seq, crc_ok });

        if assembler.is_complete() {
            let assembler = self.assembler.take().expect("assembler just observed");
            let name = assembler.metadata().name.clone();
            let data = assembler.assemble()?;
            info!(name = %name, bytes = data.len(), "file complete");
            events.push(ReceiverEvent::Complete { name, data });
            self.idle_store = Some(assembler.into_store());
            self.payload_bytes = INITIAL_PAYLOAD_BYTES;
        }
        Ok(())
    }

    fn on_legacy(&mut self, bytes: &[u8], events: &mut Vec<ReceiverEvent>) -> Result<()> {
        let (packet, crc_valid) = LegacyPacket::decode(bytes)?;
        info!(name = %packet.name, bytes = packet.data.len(), crc_valid, "legacy packet received");
        events.push(ReceiverEvent::LegacyFile {
            name: packet.name,
            data: packet.data,
            crc_valid,
        });
        Ok(())
    }
}
