//! Sample-stream utilities shared by the transmit and receive paths:
//! silence padding, peak normalization, DC removal, AGC and the f32
//! boundary conversions for audio hosts.

use crate::profile::OfdmProfile;
use crate::SAMPLE_RATE;

/// Peak amplitude of every transmitted waveform after normalization.
pub const TARGET_PEAK: f64 = 0.8;

/// Leading silence before the first frame of a burst, in seconds.
const LEAD_SILENCE_ACOUSTIC_SECS: f64 = 0.5;
const LEAD_SILENCE_SECS: f64 = 0.3;
/// Leading silence before every later frame of a burst.
const GAP_SILENCE_SECS: f64 = 0.05;
/// Trailing silence after each frame.
const TRAIL_SILENCE_SECS: f64 = 0.02;

pub fn silence(duration_secs: f64) -> Vec<f64> {
    vec![0.0; (duration_secs * SAMPLE_RATE as f64).round() as usize]
}

/// Samples of leading silence for the first frame of a burst.
pub fn lead_silence_len(profile: &OfdmProfile) -> usize {
    let secs = if profile.is_acoustic() {
        LEAD_SILENCE_ACOUSTIC_SECS
    } else {
        LEAD_SILENCE_SECS
    };
    (secs * SAMPLE_RATE as f64).round() as usize
}

pub fn gap_silence_len() -> usize {
    (GAP_SILENCE_SECS * SAMPLE_RATE as f64).round() as usize
}

pub fn trail_silence_len() -> usize {
    (TRAIL_SILENCE_SECS * SAMPLE_RATE as f64).round() as usize
}

/// Scale the whole buffer so its peak magnitude is `target`. A near-silent
/// buffer is left untouched.
pub fn normalize_peak(samples: &mut [f64], target: f64) {
    let peak = samples.iter().fold(0.0f64, |m, &s| m.max(s.abs()));
    if peak < 1e-10 {
        return;
    }
    let scale = target / peak;
    for s in samples.iter_mut() {
        *s *= scale;
    }
}

/// One complete on-air frame: leading silence, the signal parts in order,
/// trailing silence. The parts share one uniform normalization pass so the
/// channel-estimation symbol keeps the same scale as the data symbols.
pub fn assemble_frame_signal(parts: &[&[f64]], lead: usize, trail: usize) -> Vec<f64> {
    let body: usize = parts.iter().map(|p| p.len()).sum();
    let mut out = Vec::with_capacity(lead + body + trail);
    out.resize(lead, 0.0);
    for part in parts {
        out.extend_from_slice(part);
    }
    out.resize(out.len() + trail, 0.0);
    normalize_peak(&mut out, TARGET_PEAK);
    out
}

/// Streaming DC blocker: exponential moving average of the input subtracted
/// from each sample. State survives across blocks so a long capture sees
/// one continuous filter.
pub struct DcBlocker {
    mean: f64,
    primed: bool,
}

impl DcBlocker {
    const ALPHA: f64 = 0.999;

    pub fn new() -> Self {
        Self {
            mean: 0.0,
            primed: false,
        }
    }

    pub fn process(&mut self, samples: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(samples.len());
        for &s in samples {
            if !self.primed {
                self.mean = s;
                self.primed = true;
            }
            self.mean = Self::ALPHA * self.mean + (1.0 - Self::ALPHA) * s;
            out.push(s - self.mean);
        }
        out
    }
}

impl Default for DcBlocker {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot DC removal over a full capture.
pub fn apply_dc_removal(samples: &[f64]) -> Vec<f64> {
    DcBlocker::new().process(samples)
}

/// Scale a capture to the target RMS level. Near-silent input is returned
/// unchanged.
pub fn apply_agc(samples: &[f64], target_rms: f64) -> Vec<f64> {
    if samples.is_empty() {
        return Vec::new();
    }
    let rms = (samples.iter().map(|s| s * s).sum::<f64>() / samples.len() as f64).sqrt();
    if rms < 1e-10 {
        return samples.to_vec();
    }
    let gain = target_rms / rms;
    samples.iter().map(|s| s * gain).collect()
}

pub fn to_f32(samples: &[f64]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32).collect()
}

pub fn to_f64(samples: &[f32]) -> Vec<f64> {
    samples.iter().map(|&s| s as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ACOUSTIC, STANDARD};

    #[test]
    fn test_normalize_peak() {
        let mut samples = vec![0.1, -0.4, 0.2];
        normalize_peak(&mut samples, 0.8);
        assert!((samples[1] + 0.8).abs() < 1e-12);
        assert!((samples[0] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_peak_skips_silence() {
        let mut samples = vec![0.0; 16];
        normalize_peak(&mut samples, 0.8);
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_assemble_frame_signal_layout() {
        let a = vec![0.5; 4];
        let b = vec![-1.0; 4];
        let out = assemble_frame_signal(&[&a, &b], 3, 2);
        assert_eq!(out.len(), 3 + 8 + 2);
        assert!(out[..3].iter().all(|&s| s == 0.0));
        assert!(out[out.len() - 2..].iter().all(|&s| s == 0.0));
        // Uniform scale: peak is 0.8, the smaller part keeps its ratio.
        assert!((out[3] - 0.4).abs() < 1e-12);
        assert!((out[7] + 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_silence_lengths_by_profile() {
        assert_eq!(lead_silence_len(&ACOUSTIC), 22_050);
        assert_eq!(lead_silence_len(&STANDARD), 13_230);
        assert_eq!(gap_silence_len(), 2_205);
        assert_eq!(trail_silence_len(), 882);
    }

    #[test]
    fn test_dc_blocker_removes_offset() {
        let mut blocker = DcBlocker::new();
        let biased: Vec<f64> = (0..20_000)
            .map(|i| 0.5 + 0.1 * (i as f64 * 0.3).sin())
            .collect();
        let cleaned = blocker.process(&biased);
        let tail_mean: f64 = cleaned[15_000..].iter().sum::<f64>() / 5_000.0;
        assert!(tail_mean.abs() < 0.01, "residual DC {tail_mean}");
    }

    #[test]
    fn test_agc_reaches_target_rms() {
        let samples: Vec<f64> = (0..1000).map(|i| 0.05 * (i as f64 * 0.1).sin()).collect();
        let leveled = apply_agc(&samples, 0.3);
        let rms = (leveled.iter().map(|s| s * s).sum::<f64>() / leveled.len() as f64).sqrt();
        assert!((rms - 0.3).abs() < 1e-9);
    }
}
