use crate::bits::{bytes_to_bits, repeat_bits};
use crate::chunking::LegacyPacket;
use crate::error::Result;
use crate::ofdm::OfdmModulator;
use crate::profile::ModemMode;
use crate::signal::{assemble_frame_signal, lead_silence_len, to_f32, trail_silence_len};
use crate::sync::PreambleGenerator;

/// A ready-to-play waveform and its data-symbol count.
pub struct TransmitSignal {
    pub samples: Vec<f32>,
    pub num_symbols: usize,
}

/// Modulate a raw byte image into one on-air frame:
/// `[silence][P1][P2][CE][data symbols...][silence]`, uniformly normalized.
///
/// The image is zero-padded to `pad_to` bytes before modulation so the
/// receiver can predict the frame length without parsing it.
pub(crate) fn build_frame_samples(
    image: &[u8],
    mode: ModemMode,
    pad_to: usize,
    lead: usize,
) -> Result<(Vec<f64>, usize)> {
    let profile = mode.profile();

    let mut padded = image.to_vec();
    if padded.len() < pad_to {
        padded.resize(pad_to, 0);
    }

    let mut bits = repeat_bits(&bytes_to_bits(&padded), mode.repetition());

    let mut modulator = OfdmModulator::new(profile, mode.modulation());
    let per_symbol = modulator.bits_per_symbol();
    if bits.len() % per_symbol != 0 {
        bits.resize(bits.len() + per_symbol - bits.len() % per_symbol, false);
    }

    let data_samples = modulator.modulate(&bits)?;
    let num_symbols = data_samples.len() / profile.symbol_len();

    let mut generator = PreambleGenerator::new(profile);
    let (p1, p2) = generator.schmidl_cox()?;
    let (ce, _) = generator.channel_estimation()?;

    let samples = assemble_frame_signal(
        &[&p1, &p2, &ce, &data_samples],
        lead,
        trail_silence_len(),
    );
    Ok((samples, num_symbols))
}

/// Modulate an arbitrary byte image into one on-air frame. Mostly useful
/// for tooling; the file-level builders below cover the normal paths.
pub fn build_frame_waveform(
    image: &[u8],
    mode: ModemMode,
    pad_to: usize,
    lead_silence: usize,
) -> Result<TransmitSignal> {
    let (samples, num_symbols) = build_frame_samples(image, mode, pad_to, lead_silence)?;
    Ok(TransmitSignal {
        samples: to_f32(&samples),
        num_symbols,
    })
}

/// Build the complete waveform for a small file as a single legacy packet.
pub fn build_transmit_signal(
    file_bytes: &[u8],
    mode: ModemMode,
    name: &str,
) -> Result<TransmitSignal> {
    let packet = LegacyPacket::new(name, file_bytes.to_vec())?;
    let image = packet.encode();
    let (samples, num_symbols) = build_frame_samples(
        &image,
        mode,
        image.len(),
        lead_silence_len(mode.profile()),
    )?;
    Ok(TransmitSignal {
        samples: to_f32(&samples),
        num_symbols,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SAMPLE_RATE;

    #[test]
    fn test_signal_layout() {
        let signal = build_transmit_signal(b"Hello", ModemMode::Qpsk, "hi.txt").unwrap();
        let profile = ModemMode::Qpsk.profile();

        // Packet: 1 + 6 + 4 + 5 + 4 = 20 bytes = 160 bits, one QPSK symbol.
        assert_eq!(signal.num_symbols, 1);

        let lead = (0.3 * SAMPLE_RATE as f64).round() as usize;
        let trail = (0.02 * SAMPLE_RATE as f64).round() as usize;
        let expected = lead + 4 * profile.symbol_len() + trail;
        assert_eq!(signal.samples.len(), expected);
    }

    #[test]
    fn test_peak_normalized() {
        let signal = build_transmit_signal(&[0u8; 100], ModemMode::Qam16, "f.bin").unwrap();
        let peak = signal
            .samples
            .iter()
            .fold(0.0f32, |m, &s| m.max(s.abs()));
        assert!(peak <= 0.8 + 1e-6);
        assert!(peak > 0.79);
    }

    #[test]
    fn test_acoustic_mode_uses_long_lead() {
        let standard = build_transmit_signal(b"x", ModemMode::Qpsk, "a").unwrap();
        let acoustic = build_transmit_signal(b"x", ModemMode::BpskAcoustic, "a").unwrap();
        // Same payload, but the acoustic profile pads half a second up front.
        assert!(acoustic.samples.len() > standard.samples.len());
    }

    #[test]
    fn test_repetition_grows_symbol_count() {
        let single = build_transmit_signal(&[0xAA; 64], ModemMode::BpskAcoustic, "r").unwrap();
        let triple = build_transmit_signal(&[0xAA; 64], ModemMode::BpskRepeat, "r").unwrap();
        assert!(triple.num_symbols >= 3 * single.num_symbols - 2);
    }

    #[test]
    fn test_overlong_name_rejected() {
        let name = "n".repeat(255);
        assert!(build_transmit_signal(b"x", ModemMode::Qpsk, &name).is_err());
    }
}
