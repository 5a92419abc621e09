use crate::chunking::{DataChunk, FileMetadata};
use crate::encoder::build_frame_samples;
use crate::error::{ModemError, Result};
use crate::host::AudioSink;
use crate::profile::ModemMode;
use crate::signal::{gap_silence_len, lead_silence_len, to_f32};
use crate::{DATA_CHUNK_OVERHEAD, INITIAL_PAYLOAD_BYTES};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Waveform for the metadata frame that opens a chunked transfer. The
/// first frame of a burst carries the long leading silence.
pub fn build_metadata_frame(meta: &FileMetadata, mode: ModemMode) -> Result<Vec<f32>> {
    let (samples, _) = build_frame_samples(
        &meta.encode(),
        mode,
        INITIAL_PAYLOAD_BYTES,
        lead_silence_len(mode.profile()),
    )?;
    Ok(to_f32(&samples))
}

/// Waveform for one data-chunk frame. Every chunk frame is padded to the
/// same byte budget (`chunk_size` + wire overhead) so the receiver can
/// predict its length, and uses the short inter-frame gap.
pub fn build_data_chunk_frame(
    chunk: &DataChunk,
    chunk_size: usize,
    mode: ModemMode,
) -> Result<Vec<f32>> {
    if chunk.data.len() > chunk_size {
        return Err(ModemError::Format(format!(
            "chunk of {} bytes exceeds negotiated size {chunk_size}",
            chunk.data.len()
        )));
    }
    let (samples, _) = build_frame_samples(
        &chunk.encode(),
        mode,
        chunk_size + DATA_CHUNK_OVERHEAD,
        gap_silence_len(),
    )?;
    Ok(to_f32(&samples))
}

/// Plays a whole file as a chunked burst: one metadata frame, then one
/// frame per chunk, end to end. The next frame is synthesized before the
/// current one is handed to the sink, so waveform production stays one
/// frame ahead of the audio clock.
pub struct ChunkedFileSender {
    mode: ModemMode,
    name: String,
    data: Vec<u8>,
    cancel: Arc<AtomicBool>,
}

impl ChunkedFileSender {
    pub fn new(name: &str, data: Vec<u8>, mode: ModemMode) -> Result<Self> {
        if data.is_empty() {
            return Err(ModemError::Format("refusing to send an empty file".into()));
        }
        if data.len() > u32::MAX as usize {
            return Err(ModemError::Format("file too large for the chunk protocol".into()));
        }
        Ok(Self {
            mode,
            name: name.to_string(),
            data,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shared stop flag; flipping it aborts the burst at the next frame
    /// boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn total_chunks(&self) -> u32 {
        self.data.len().div_ceil(self.mode.chunk_size()) as u32
    }

    /// Synthesize and play the full burst. Blocks until the sink has
    /// accepted the last frame or the cancel flag is observed.
    pub fn send(&self, sink: &mut dyn AudioSink) -> Result<()> {
        let chunk_size = self.mode.chunk_size();
        let total_chunks = self.total_chunks();

        let meta = FileMetadata::new(
            total_chunks,
            self.data.len() as u32,
            chunk_size,
            &self.name,
        )?;
        info!(
            name = %self.name,
            size = self.data.len(),
            total_chunks,
            chunk_size,
            "starting chunked send"
        );

        // `pending` is the frame currently owed to the sink; the next one
        // is built before `pending` is written.
        let mut pending = build_metadata_frame(&meta, self.mode)?;
        let mut next_seq = 0u32;

        loop {
            if self.cancel.load(Ordering::Relaxed) {
                info!("chunked send cancelled");
                return Err(ModemError::Cancelled);
            }

            let upcoming = if next_seq < total_chunks {
                Some(self.build_chunk_waveform(next_seq, chunk_size)?)
            } else {
                None
            };

            sink.write(&pending)?;

            match upcoming {
                Some(waveform) => {
                    debug!(seq = next_seq, "chunk frame queued");
                    pending = waveform;
                    next_seq += 1;
                }
                None => break,
            }
        }

        info!(name = %self.name, "chunked send complete");
        Ok(())
    }

    fn build_chunk_waveform(&self, seq: u32, chunk_size: usize) -> Result<Vec<f32>> {
        let start = seq as usize * chunk_size;
        let end = (start + chunk_size).min(self.data.len());
        let chunk = DataChunk::new(seq, self.data[start..end].to_vec())?;
        build_data_chunk_frame(&chunk, chunk_size, self.mode)
    }
}
