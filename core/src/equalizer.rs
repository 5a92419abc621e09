use crate::error::{ModemError, Result};
use crate::profile::OfdmProfile;
use rustfft::num_complex::Complex;

/// Per-subcarrier channel estimate and zero-forcing equalization.
///
/// `estimate` wants the FFT of a received training symbol whose transmitted
/// spectrum is known at both ends. Bins where the reference carries no
/// energy are filled by linear interpolation between their neighbors.
pub struct Equalizer {
    fft_size: usize,
    sub_start: usize,
    sub_end: usize,
    channel: Vec<Complex<f64>>,
    estimated: bool,
}

impl Equalizer {
    pub fn new(profile: &OfdmProfile) -> Self {
        Self {
            fft_size: profile.fft_size,
            sub_start: profile.sub_start,
            sub_end: profile.sub_end,
            channel: vec![Complex::new(0.0, 0.0); profile.fft_size],
            estimated: false,
        }
    }

    /// Least-squares channel estimate from a known training symbol:
    /// `H[k] = Y[k] * conj(X[k]) / |X[k]|^2` for every in-band bin with a
    /// live reference. Fails with `ChannelUnobservable` when most of the
    /// band comes back dead.
    pub fn estimate(&mut self, received: &[Complex<f64>], known: &[Complex<f64>]) -> Result<()> {
        self.channel = vec![Complex::new(0.0, 0.0); self.fft_size];

        let mut live = 0usize;
        for k in self.sub_start..=self.sub_end {
            if k >= received.len() || k >= known.len() {
                continue;
            }
            let ref_power = known[k].norm_sqr();
            if ref_power > 1e-10 {
                self.channel[k] = received[k] * known[k].conj() / ref_power;
                if self.channel[k].norm_sqr() > 1e-10 {
                    live += 1;
                }
            }
        }

        let band = self.sub_end - self.sub_start + 1;
        if live * 2 < band {
            self.estimated = false;
            return Err(ModemError::ChannelUnobservable);
        }

        self.interpolate();
        self.estimated = true;
        Ok(())
    }

    /// Linear interpolation across in-band bins without an estimate.
    fn interpolate(&mut self) {
        let mut known_bins: Vec<usize> = Vec::new();
        for k in self.sub_start..=self.sub_end {
            if self.channel[k].norm_sqr() > 0.0 {
                known_bins.push(k);
            }
        }
        if known_bins.len() < 2 {
            return;
        }

        for pair in known_bins.windows(2) {
            let (k1, k2) = (pair[0], pair[1]);
            let (v1, v2) = (self.channel[k1], self.channel[k2]);
            for k in k1 + 1..k2 {
                if self.channel[k].norm_sqr() == 0.0 {
                    let t = (k - k1) as f64 / (k2 - k1) as f64;
                    self.channel[k] = v1 * (1.0 - t) + v2 * t;
                }
            }
        }
    }

    /// Zero-forcing equalization in place: `X = Y * conj(H) / |H|^2` on
    /// every in-band bin where the channel has usable energy. Dead bins
    /// pass through unchanged.
    pub fn equalize(&self, spectrum: &mut [Complex<f64>]) {
        for k in self.sub_start..=self.sub_end.min(spectrum.len().saturating_sub(1)) {
            let h_power = self.channel[k].norm_sqr();
            if h_power > 1e-10 {
                spectrum[k] = spectrum[k] * self.channel[k].conj() / h_power;
            }
        }
    }

    /// MMSE equalization: `W = conj(H) / (|H|^2 + noise_power)`. More
    /// forgiving than zero-forcing where the channel fades.
    pub fn equalize_mmse(&self, spectrum: &mut [Complex<f64>], noise_power: f64) {
        for k in self.sub_start..=self.sub_end.min(spectrum.len().saturating_sub(1)) {
            let h = self.channel[k];
            let denom = h.norm_sqr() + noise_power;
            if denom > 1e-10 {
                spectrum[k] = spectrum[k] * h.conj() / denom;
            }
        }
    }

    pub fn has_estimate(&self) -> bool {
        self.estimated
    }

    pub fn channel_response(&self) -> &[Complex<f64>] {
        &self.channel
    }
}
