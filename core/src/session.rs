//! Link frames over the audio channel: the wiring the ARQ transport's two
//! callables are made of. Sending modulates one frame into a padded OFDM
//! waveform and blocks on the sink; receiving captures blocks from the
//! source, hunts for the preamble, and demodulates symbols incrementally
//! until the frame image is complete or the deadline passes.

use crate::bits::{bits_to_bytes, majority_vote};
use crate::encoder::build_frame_waveform;
use crate::error::{ModemError, Result};
use crate::framing::{Frame, CRC_SIZE, HEADER_SIZE};
use crate::host::{AudioSink, AudioSource, Clock};
use crate::ofdm::OfdmDemodulator;
use crate::profile::ModemMode;
use crate::signal::{apply_agc, normalize_peak, to_f64, DcBlocker, TARGET_PEAK};
use crate::sync::{cross_correlate_fine, detect_preamble_coarse, PreambleGenerator, FINE_THRESHOLD};
use std::time::Duration;
use tracing::{debug, trace};

/// Samples pulled from the capture device per read.
const READ_BLOCK: usize = 4096;

/// Modulate one link frame and hand it to the playback device. Blocks
/// until the sink has buffered the waveform.
pub fn send_frame(sink: &mut dyn AudioSink, frame: &Frame, mode: ModemMode) -> Result<()> {
    let image = frame.encode()?;
    let waveform = build_frame_waveform(
        &image,
        mode,
        image.len(),
        crate::signal::lead_silence_len(mode.profile()),
    )?;
    trace!(
        frame_type = %frame.frame_type,
        seq = frame.seq,
        samples = waveform.samples.len(),
        "frame on air"
    );
    sink.write(&waveform.samples)
}

/// Capture and demodulate the next link frame, giving up at the deadline.
///
/// Symbols are decoded as they arrive: once the four header bytes are in,
/// the payload length pins down the full wire size, and the capture loop
/// runs exactly until that many bytes have been recovered.
pub fn receive_frame(
    source: &mut dyn AudioSource,
    mode: ModemMode,
    timeout: Duration,
    clock: &dyn Clock,
) -> Result<Frame> {
    let profile = mode.profile();
    let symbol_len = profile.symbol_len();
    let repetition = mode.repetition();

    let mut generator = PreambleGenerator::new(profile);
    let (p1, _) = generator.schmidl_cox()?;
    let (_, ce_known) = generator.channel_estimation()?;
    let mut demodulator = OfdmDemodulator::new(profile, mode.modulation());

    let deadline = clock.now() + timeout;
    let mut dc = DcBlocker::new();
    let mut capture: Vec<f64> = Vec::new();

    let mut frame_start: Option<usize> = None;
    let mut decoded_bits: Vec<bool> = Vec::new();
    let mut next_symbol = 0usize;

    loop {
        if clock.now() >= deadline {
            return Err(ModemError::Timeout);
        }

        match source.read(READ_BLOCK) {
            Ok(block) if block.is_empty() => return Err(ModemError::Timeout),
            Ok(block) => capture.extend(dc.process(&to_f64(&block))),
            Err(e) => return Err(e),
        }

        if frame_start.is_none() {
            frame_start = locate_frame(&capture, &p1, profile.cp_len);
            if let Some(start) = frame_start {
                debug!(start, "link frame preamble found");
                // Channel estimate as soon as the training symbol is in.
                let ce_start = start + 2 * symbol_len;
                if capture.len() >= ce_start + symbol_len {
                    let mut ce = capture[ce_start..ce_start + symbol_len].to_vec();
                    normalize_peak(&mut ce, TARGET_PEAK);
                    demodulator.estimate_channel_from_symbol(&ce, &ce_known)?;
                } else {
                    frame_start = None;
                }
            }
        }

        let Some(start) = frame_start else { continue };

        // Demodulate every complete data symbol we have not seen yet.
        loop {
            let sym_start = start + (3 + next_symbol) * symbol_len;
            if capture.len() < sym_start + symbol_len {
                break;
            }
            let mut symbol = capture[sym_start..sym_start + symbol_len].to_vec();
            normalize_peak(&mut symbol, TARGET_PEAK);
            decoded_bits.extend(demodulator.demodulate_symbol(&symbol)?);
            next_symbol += 1;

            let bytes = bits_to_bytes(&majority_vote(&decoded_bits, repetition));
            if let Some(frame) = try_parse(&bytes)? {
                return Ok(frame);
            }
        }
    }
}

/// Parse the accumulated byte image once enough of it is present. `None`
/// means keep demodulating; CRC failure on a complete image is final.
fn try_parse(bytes: &[u8]) -> Result<Option<Frame>> {
    if bytes.len() < HEADER_SIZE {
        return Ok(None);
    }
    let payload_len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    let total = HEADER_SIZE + payload_len + CRC_SIZE;
    if bytes.len() < total {
        return Ok(None);
    }
    Frame::decode(&bytes[..total]).map(Some)
}

fn locate_frame(capture: &[f64], p1: &[f64], cp_len: usize) -> Option<usize> {
    if capture.len() < 2 * p1.len() {
        return None;
    }
    let leveled = apply_agc(capture, 0.3);
    let (coarse, _) = detect_preamble_coarse(&leveled, p1.len() - cp_len)?;
    match cross_correlate_fine(&leveled, p1, coarse, 3 * cp_len) {
        Some((pos, corr)) if corr > FINE_THRESHOLD => Some(pos),
        _ => None,
    }
}
