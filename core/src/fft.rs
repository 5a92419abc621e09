use crate::error::{ModemError, Result};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Forward/inverse FFT front end used by every DSP stage.
///
/// Wraps a cached rustfft planner and exposes the split real/imaginary
/// array form the modulators work in. All transforms require a power-of-two
/// length; `ifft` applies the 1/N scale so `ifft(fft(x)) == x`.
pub struct FftEngine {
    planner: FftPlanner<f64>,
}

impl FftEngine {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    fn check_len(n: usize) -> Result<()> {
        if n == 0 || n & (n - 1) != 0 {
            return Err(ModemError::Format(format!(
                "FFT length must be a nonzero power of two, got {n}"
            )));
        }
        Ok(())
    }

    /// In-place forward transform over a complex buffer.
    pub fn fft_complex(&mut self, buf: &mut [Complex<f64>]) -> Result<()> {
        Self::check_len(buf.len())?;
        let fft = self.planner.plan_fft_forward(buf.len());
        fft.process(buf);
        Ok(())
    }

    /// In-place inverse transform over a complex buffer, scaled by 1/N.
    pub fn ifft_complex(&mut self, buf: &mut [Complex<f64>]) -> Result<()> {
        Self::check_len(buf.len())?;
        let fft = self.planner.plan_fft_inverse(buf.len());
        fft.process(buf);
        let scale = 1.0 / buf.len() as f64;
        for v in buf.iter_mut() {
            *v *= scale;
        }
        Ok(())
    }

    /// Forward transform over split (real, imag) arrays of equal length.
    pub fn fft(&mut self, re: &mut [f64], im: &mut [f64]) -> Result<()> {
        let mut buf = Self::join(re, im)?;
        self.fft_complex(&mut buf)?;
        Self::split(&buf, re, im);
        Ok(())
    }

    /// Inverse transform over split (real, imag) arrays, scaled by 1/N.
    pub fn ifft(&mut self, re: &mut [f64], im: &mut [f64]) -> Result<()> {
        let mut buf = Self::join(re, im)?;
        self.ifft_complex(&mut buf)?;
        Self::split(&buf, re, im);
        Ok(())
    }

    /// FFT of a real-valued signal.
    pub fn real_fft(&mut self, x: &[f64]) -> Result<Vec<Complex<f64>>> {
        let mut buf: Vec<Complex<f64>> = x.iter().map(|&v| Complex::new(v, 0.0)).collect();
        self.fft_complex(&mut buf)?;
        Ok(buf)
    }

    /// Inverse FFT keeping only the real part of the result.
    pub fn real_ifft(&mut self, spectrum: &[Complex<f64>]) -> Result<Vec<f64>> {
        let mut buf = spectrum.to_vec();
        self.ifft_complex(&mut buf)?;
        Ok(buf.iter().map(|v| v.re).collect())
    }

    fn join(re: &[f64], im: &[f64]) -> Result<Vec<Complex<f64>>> {
        if re.len() != im.len() {
            return Err(ModemError::Format(format!(
                "real/imag length mismatch: {} vs {}",
                re.len(),
                im.len()
            )));
        }
        Ok(re
            .iter()
            .zip(im.iter())
            .map(|(&r, &i)| Complex::new(r, i))
            .collect())
    }

    fn split(buf: &[Complex<f64>], re: &mut [f64], im: &mut [f64]) {
        for (i, v) in buf.iter().enumerate() {
            re[i] = v.re;
            im[i] = v.im;
        }
    }
}

impl Default for FftEngine {
    fn default() -> Self {
        Self::new()
    }
}
