use crate::bits::{bits_to_bytes, majority_vote};
use crate::chunking::LegacyPacket;
use crate::error::{ModemError, Result};
use crate::ofdm::OfdmDemodulator;
use crate::profile::ModemMode;
use crate::signal::{apply_agc, apply_dc_removal, to_f64};
use crate::sync::{
    cross_correlate_fine, detect_preamble_coarse, PreambleGenerator, FINE_THRESHOLD,
    STANDALONE_FINE_THRESHOLD,
};
use tracing::debug;

/// Result of decoding a legacy single-shot capture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedFile {
    pub file_name: String,
    pub data: Vec<u8>,
    pub crc_valid: bool,
}

/// Recover a legacy packet from a complete capture: clean the signal, find
/// the preamble, estimate the channel from the training symbol, demodulate
/// everything after it and parse the packet image.
pub fn decode_received_signal(samples: &[f32], mode: ModemMode) -> Result<DecodedFile> {
    let profile = mode.profile();
    let symbol_len = profile.symbol_len();

    if samples.len() < 4 * symbol_len {
        return Err(ModemError::InsufficientData);
    }

    let cleaned = apply_agc(&apply_dc_removal(&to_f64(samples)), 0.3);

    let mut generator = PreambleGenerator::new(profile);
    let (p1, _) = generator.schmidl_cox()?;
    let (_, ce_known) = generator.channel_estimation()?;

    let frame_start = locate_preamble(&cleaned, &p1, profile.cp_len)?;
    debug!(frame_start, "preamble located");

    let ce_start = frame_start + 2 * symbol_len;
    let data_start = frame_start + 3 * symbol_len;
    if data_start + symbol_len > cleaned.len() {
        return Err(ModemError::InsufficientData);
    }

    let mut demodulator = OfdmDemodulator::new(profile, mode.modulation());
    demodulator
        .estimate_channel_from_symbol(&cleaned[ce_start..ce_start + symbol_len], &ce_known)?;

    let data_end = data_start + ((cleaned.len() - data_start) / symbol_len) * symbol_len;
    let bits = demodulator.demodulate(&cleaned[data_start..data_end])?;
    let bytes = bits_to_bytes(&majority_vote(&bits, mode.repetition()));

    let (packet, crc_valid) = LegacyPacket::decode(&bytes)?;
    Ok(DecodedFile {
        file_name: packet.name,
        data: packet.data,
        crc_valid,
    })
}

/// Coarse auto-correlation first, refined by cross-correlation against P1;
/// falls back to a standalone cross-correlation sweep with a stricter
/// threshold when the coarse metric never fires.
fn locate_preamble(signal: &[f64], p1: &[f64], cp_len: usize) -> Result<usize> {
    let radius = 3 * cp_len;

    if let Some((coarse_pos, metric)) = detect_preamble_coarse(signal, p1.len() - cp_len) {
        debug!(coarse_pos, metric, "coarse preamble candidate");
        if let Some((pos, corr)) = cross_correlate_fine(signal, p1, coarse_pos, radius) {
            if corr > FINE_THRESHOLD {
                return Ok(pos);
            }
        }
    }

    // No coarse hit: sweep the whole capture.
    let center = signal.len() / 2;
    if let Some((pos, corr)) = cross_correlate_fine(signal, p1, center, signal.len()) {
        if corr > STANDALONE_FINE_THRESHOLD {
            debug!(pos, corr, "standalone cross-correlation hit");
            return Ok(pos);
        }
    }

    Err(ModemError::PreambleNotDetected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::build_transmit_signal;

    #[test]
    fn test_legacy_echo() {
        let data = vec![0x48, 0x65, 0x6C, 0x6C, 0x6F];
        let signal = build_transmit_signal(&data, ModemMode::Qpsk, "hi.txt").unwrap();
        let decoded = decode_received_signal(&signal.samples, ModemMode::Qpsk).unwrap();
        assert_eq!(decoded.file_name, "hi.txt");
        assert_eq!(decoded.data, data);
        assert!(decoded.crc_valid);
    }

    #[test]
    fn test_silence_only_has_no_preamble() {
        let silence = vec![0.0f32; 8 * ModemMode::Qpsk.profile().symbol_len()];
        match decode_received_signal(&silence, ModemMode::Qpsk) {
            Err(ModemError::PreambleNotDetected) => {}
            other => panic!("expected PreambleNotDetected, got {other:?}"),
        }
    }

    #[test]
    fn test_too_short_capture() {
        let short = vec![0.0f32; 100];
        assert!(matches!(
            decode_received_signal(&short, ModemMode::Qpsk),
            Err(ModemError::InsufficientData)
        ));
    }
}
