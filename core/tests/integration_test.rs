use wavesend_core::constellation::{Constellation, Modulation};
use wavesend_core::framing::Frame;
use wavesend_core::{build_transmit_signal, decode_received_signal, ModemError, ModemMode};

/// Cheap deterministic noise for robustness tests.
fn add_noise(samples: &mut [f32], amplitude: f32, mut state: u32) {
    for sample in samples.iter_mut() {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        let noise = ((state >> 16) as f32 / 65536.0 - 0.5) * amplitude;
        *sample += noise;
    }
}

#[test]
fn test_legacy_echo() {
    let data = vec![0x48, 0x65, 0x6C, 0x6C, 0x6F];
    let signal = build_transmit_signal(&data, ModemMode::Qpsk, "hi.txt").unwrap();
    assert!(!signal.samples.is_empty());

    let decoded = decode_received_signal(&signal.samples, ModemMode::Qpsk).unwrap();
    assert_eq!(decoded.file_name, "hi.txt");
    assert_eq!(decoded.data, data);
    assert!(decoded.crc_valid);
}

#[test]
fn test_legacy_echo_all_modes() {
    let data: Vec<u8> = (0..200u16).map(|i| (i % 256) as u8).collect();
    for mode in [
        ModemMode::Qpsk,
        ModemMode::Qam16,
        ModemMode::BpskAcoustic,
        ModemMode::BpskRepeat,
        ModemMode::BpskNarrow,
    ] {
        let signal = build_transmit_signal(&data, mode, "all.bin").unwrap();
        let decoded = decode_received_signal(&signal.samples, mode).unwrap();
        assert_eq!(decoded.data, data, "mode {mode:?}");
        assert!(decoded.crc_valid, "mode {mode:?}");
    }
}

#[test]
fn test_legacy_echo_binary_data() {
    let data = vec![0, 1, 2, 255, 128, 64, 32, 16, 8, 4, 2, 1, 0];
    let signal = build_transmit_signal(&data, ModemMode::Qpsk, "bin.dat").unwrap();
    let decoded = decode_received_signal(&signal.samples, ModemMode::Qpsk).unwrap();
    assert_eq!(decoded.data, data);
    assert!(decoded.crc_valid);
}

#[test]
fn test_legacy_echo_empty_file() {
    let signal = build_transmit_signal(&[], ModemMode::Qpsk, "empty").unwrap();
    let decoded = decode_received_signal(&signal.samples, ModemMode::Qpsk).unwrap();
    assert_eq!(decoded.file_name, "empty");
    assert!(decoded.data.is_empty());
    assert!(decoded.crc_valid);
}

#[test]
fn test_legacy_echo_with_leading_silence() {
    let data = b"silence in front".to_vec();
    let signal = build_transmit_signal(&data, ModemMode::Qpsk, "s.txt").unwrap();

    let mut augmented = vec![0.0f32; 44_100];
    augmented.extend_from_slice(&signal.samples);

    let decoded = decode_received_signal(&augmented, ModemMode::Qpsk).unwrap();
    assert_eq!(decoded.data, data);
}

#[test]
fn test_legacy_echo_with_trailing_silence() {
    let data = b"silence behind".to_vec();
    let signal = build_transmit_signal(&data, ModemMode::Qpsk, "t.txt").unwrap();

    let mut augmented = signal.samples.clone();
    augmented.extend(vec![0.0f32; 44_100]);

    let decoded = decode_received_signal(&augmented, ModemMode::Qpsk).unwrap();
    assert_eq!(decoded.data, data);
}

#[test]
fn test_legacy_echo_with_light_noise() {
    let data = b"a little hiss never hurt".to_vec();
    let mut signal = build_transmit_signal(&data, ModemMode::Qpsk, "n.txt").unwrap();
    add_noise(&mut signal.samples, 0.02, 12_345);

    let decoded = decode_received_signal(&signal.samples, ModemMode::Qpsk).unwrap();
    assert_eq!(decoded.data, data);
    assert!(decoded.crc_valid);
}

#[test]
fn test_repetition_survives_noise_better() {
    let data = b"repetition coded payload".to_vec();
    let mut signal = build_transmit_signal(&data, ModemMode::BpskRepeat, "r.txt").unwrap();
    add_noise(&mut signal.samples, 0.05, 99_999);

    let decoded = decode_received_signal(&signal.samples, ModemMode::BpskRepeat).unwrap();
    assert_eq!(decoded.data, data);
    assert!(decoded.crc_valid);
}

#[test]
fn test_wrong_mode_does_not_panic() {
    let data = b"sent as QPSK".to_vec();
    let signal = build_transmit_signal(&data, ModemMode::Qpsk, "w.txt").unwrap();
    // Decoding with a mismatched constellation must fail cleanly or come
    // back flagged, never panic.
    match decode_received_signal(&signal.samples, ModemMode::Qam16) {
        Ok(decoded) => assert!(!decoded.crc_valid || decoded.data == data),
        Err(_) => {}
    }
}

#[test]
fn test_frame_round_trip_and_corruption() {
    let frame = Frame::data(42, b"Hello, World!".to_vec());
    let encoded = frame.encode().unwrap();
    assert_eq!(encoded.len(), 21);

    let decoded = Frame::decode(&encoded).unwrap();
    assert_eq!(decoded, frame);

    let mut corrupted = encoded;
    corrupted[5] ^= 0x01;
    match Frame::decode(&corrupted) {
        Err(ModemError::CrcMismatch) => {}
        other => panic!("expected CrcMismatch, got {other:?}"),
    }
}

#[test]
fn test_qam64_full_index_sweep() {
    let constellation = Constellation::new(Modulation::Qam64);
    for index in 0..64usize {
        let bits: Vec<bool> = (0..6).rev().map(|b| (index >> b) & 1 == 1).collect();
        let point = constellation.map(&bits);
        let recovered = constellation.demap(point);
        let back = recovered
            .iter()
            .fold(0usize, |acc, &b| (acc << 1) | b as usize);
        assert_eq!(back, index);
    }
}
