use crate::constellation::{Constellation, Modulation};
use crate::equalizer::Equalizer;
use crate::error::{ModemError, Result};
use crate::fft::FftEngine;
use crate::profile::OfdmProfile;
use crate::signal::normalize_peak;
use rustfft::num_complex::Complex;

/// OFDM modulator: data bits to real audio samples, one symbol at a time.
pub struct OfdmModulator {
    profile: &'static OfdmProfile,
    constellation: Constellation,
    fft: FftEngine,
}

/// OFDM demodulator: audio samples back to data bits, equalized against the
/// channel estimate installed from the training symbol.
pub struct OfdmDemodulator {
    profile: &'static OfdmProfile,
    constellation: Constellation,
    fft: FftEngine,
    equalizer: Equalizer,
}

impl OfdmModulator {
    pub fn new(profile: &'static OfdmProfile, modulation: Modulation) -> Self {
        Self {
            profile,
            constellation: Constellation::new(modulation),
            fft: FftEngine::new(),
        }
    }

    /// Data bits carried by each OFDM symbol.
    pub fn bits_per_symbol(&self) -> usize {
        self.profile
            .bits_per_ofdm_symbol(self.constellation.modulation())
    }

    /// Modulate a bit stream whose length is a multiple of
    /// `bits_per_symbol` into consecutive OFDM symbols.
    pub fn modulate(&mut self, bits: &[bool]) -> Result<Vec<f64>> {
        let per_symbol = self.bits_per_symbol();
        if bits.len() % per_symbol != 0 {
            return Err(ModemError::Format(format!(
                "bit count {} is not a multiple of {per_symbol}",
                bits.len()
            )));
        }

        let mut samples = Vec::with_capacity((bits.len() / per_symbol) * self.profile.symbol_len());
        for symbol_bits in bits.chunks_exact(per_symbol) {
            samples.extend(self.modulate_symbol(symbol_bits)?);
        }
        Ok(samples)
    }

    /// Build one `SYMBOL_LEN`-sample OFDM symbol from exactly
    /// `bits_per_symbol` bits: constellation mapping, pilot insertion,
    /// Hermitian symmetry, IFFT, cyclic prefix, peak scaling.
    pub fn modulate_symbol(&mut self, bits: &[bool]) -> Result<Vec<f64>> {
        if bits.len() != self.bits_per_symbol() {
            return Err(ModemError::Format(format!(
                "expected {} bits per symbol, got {}",
                self.bits_per_symbol(),
                bits.len()
            )));
        }

        let data_symbols = self.constellation.map_bits(bits);
        let mut spectrum = vec![Complex::new(0.0, 0.0); self.profile.fft_size];

        let mut data_idx = 0usize;
        for k in self.profile.sub_start..=self.profile.sub_end {
            if self.profile.is_pilot(k) {
                spectrum[k] = Complex::new(1.0, 0.0);
            } else {
                spectrum[k] = data_symbols[data_idx];
                data_idx += 1;
            }
        }

        apply_hermitian_symmetry(&mut spectrum);

        let time_domain = self.fft.real_ifft(&spectrum)?;
        let mut symbol = add_cyclic_prefix(&time_domain, self.profile.cp_len);
        normalize_peak(&mut symbol, 0.8);
        Ok(symbol)
    }
}

impl OfdmDemodulator {
    pub fn new(profile: &'static OfdmProfile, modulation: Modulation) -> Self {
        Self {
            profile,
            constellation: Constellation::new(modulation),
            fft: FftEngine::new(),
            equalizer: Equalizer::new(profile),
        }
    }

    pub fn bits_per_symbol(&self) -> usize {
        self.profile
            .bits_per_ofdm_symbol(self.constellation.modulation())
    }

    /// Install the channel estimate from an already-transformed training
    /// symbol spectrum.
    pub fn set_channel_estimate(
        &mut self,
        received: &[Complex<f64>],
        known: &[Complex<f64>],
    ) -> Result<()> {
        self.equalizer.estimate(received, known)
    }

    /// Estimate the channel from a time-domain training symbol slice of
    /// `SYMBOL_LEN` samples aligned to the channel-estimation symbol.
    pub fn estimate_channel_from_symbol(
        &mut self,
        samples: &[f64],
        known: &[Complex<f64>],
    ) -> Result<()> {
        if samples.len() < self.profile.symbol_len() {
            return Err(ModemError::InsufficientData);
        }
        let without_cp = &samples[self.profile.cp_len..self.profile.symbol_len()];
        let received = self.fft.real_fft(without_cp)?;
        self.equalizer.estimate(&received, known)
    }

    pub fn has_channel_estimate(&self) -> bool {
        self.equalizer.has_estimate()
    }

    /// Demodulate consecutive `SYMBOL_LEN`-sample blocks into one bit
    /// stream. Trailing samples short of a full symbol are ignored.
    pub fn demodulate(&mut self, samples: &[f64]) -> Result<Vec<bool>> {
        let symbol_len = self.profile.symbol_len();
        if samples.len() < symbol_len {
            return Err(ModemError::InsufficientData);
        }

        let mut bits = Vec::new();
        for symbol in samples.chunks_exact(symbol_len) {
            bits.extend(self.demodulate_symbol(symbol)?);
        }
        Ok(bits)
    }

    /// Demodulate one OFDM symbol: strip the prefix, transform, equalize,
    /// correct the residual common phase from the pilots, demap.
    pub fn demodulate_symbol(&mut self, samples: &[f64]) -> Result<Vec<bool>> {
        if samples.len() < self.profile.symbol_len() {
            return Err(ModemError::InsufficientData);
        }

        let without_cp = &samples[self.profile.cp_len..self.profile.symbol_len()];
        let mut spectrum = self.fft.real_fft(without_cp)?;
        self.equalizer.equalize(&mut spectrum);

        let theta = self.pilot_phase_offset(&spectrum);
        let gain = self.pilot_gain(&spectrum, theta);

        let mut bits = Vec::with_capacity(self.bits_per_symbol());
        for k in self.profile.sub_start..=self.profile.sub_end {
            if self.profile.is_pilot(k) {
                continue;
            }
            let x = spectrum[k];
            // Small-angle rotation by -theta, then pilot-referenced gain.
            let corrected =
                Complex::new(x.re + theta * x.im, x.im - theta * x.re) / gain;
            bits.extend(self.constellation.demap(corrected));
        }
        Ok(bits)
    }

    /// Common phase error across the symbol, estimated from the pilots with
    /// the small-angle approximation `theta ~ Im/Re`.
    fn pilot_phase_offset(&self, spectrum: &[Complex<f64>]) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for &k in self.profile.pilots {
            let p = spectrum[k];
            if p.re.abs() > 1e-6 {
                sum += p.im / p.re;
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// Residual amplitude on the pilots after phase correction. Each symbol
    /// is peak-scaled independently on the transmit side, so the pilots are
    /// the only reference tying the data symbols back to the training
    /// symbol's scale.
    fn pilot_gain(&self, spectrum: &[Complex<f64>], theta: f64) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for &k in self.profile.pilots {
            let p = spectrum[k];
            let rotated_re = p.re + theta * p.im;
            if rotated_re.abs() > 1e-6 {
                sum += rotated_re;
                count += 1;
            }
        }
        if count == 0 {
            return 1.0;
        }
        let gain = sum / count as f64;
        if gain.abs() < 1e-6 {
            1.0
        } else {
            gain
        }
    }
}

/// Mirror the lower half of the spectrum into the upper half so the IFFT
/// output is purely real. DC is zeroed; Nyquist keeps only its real part.
pub(crate) fn apply_hermitian_symmetry(spectrum: &mut [Complex<f64>]) {
    let n = spectrum.len();
    for k in 1..n / 2 {
        spectrum[n - k] = spectrum[k].conj();
    }
    spectrum[0] = Complex::new(0.0, 0.0);
    spectrum[n / 2] = Complex::new(spectrum[n / 2].re, 0.0);
}

/// Copy the last `cp_len` samples in front of the symbol as its guard
/// interval.
pub(crate) fn add_cyclic_prefix(samples: &[f64], cp_len: usize) -> Vec<f64> {
    let n = samples.len();
    let mut out = Vec::with_capacity(cp_len + n);
    out.extend_from_slice(&samples[n - cp_len..]);
    out.extend_from_slice(samples);
    out
}
