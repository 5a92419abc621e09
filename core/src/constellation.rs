use rustfft::num_complex::Complex;
use std::fmt;

/// QAM modulation scheme carried on each data subcarrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Modulation {
    Bpsk,
    Qpsk,
    Qam16,
    Qam64,
}

impl Modulation {
    pub fn bits_per_symbol(&self) -> usize {
        match self {
            Modulation::Bpsk => 1,
            Modulation::Qpsk => 2,
            Modulation::Qam16 => 4,
            Modulation::Qam64 => 6,
        }
    }
}

impl fmt::Display for Modulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Modulation::Bpsk => "BPSK",
            Modulation::Qpsk => "QPSK",
            Modulation::Qam16 => "16-QAM",
            Modulation::Qam64 => "64-QAM",
        };
        write!(f, "{name}")
    }
}

/// Gray-coded constellation normalized to unit average power.
///
/// Bit labels are MSB-first indices into the point table, so label `i`
/// always maps to `points[i]`.
pub struct Constellation {
    modulation: Modulation,
    points: Vec<Complex<f64>>,
}

impl Constellation {
    pub fn new(modulation: Modulation) -> Self {
        let mut points = match modulation {
            Modulation::Bpsk => generate_bpsk(),
            Modulation::Qpsk => generate_qpsk(),
            Modulation::Qam16 => generate_qam(4),
            Modulation::Qam64 => generate_qam(8),
        };
        normalize(&mut points);
        Self { modulation, points }
    }

    pub fn modulation(&self) -> Modulation {
        self.modulation
    }

    pub fn bits_per_symbol(&self) -> usize {
        self.modulation.bits_per_symbol()
    }

    /// Map `bits_per_symbol` bits (MSB first) to a constellation point.
    pub fn map(&self, bits: &[bool]) -> Complex<f64> {
        let mut idx = 0usize;
        for &b in bits {
            idx = (idx << 1) | b as usize;
        }
        if idx >= self.points.len() {
            idx = 0;
        }
        self.points[idx]
    }

    /// Nearest-neighbor demap back to MSB-first bits. Ties break to the
    /// lowest index.
    pub fn demap(&self, symbol: Complex<f64>) -> Vec<bool> {
        let mut min_dist = f64::MAX;
        let mut min_idx = 0usize;
        for (i, p) in self.points.iter().enumerate() {
            let d = (symbol - p).norm_sqr();
            if d < min_dist {
                min_dist = d;
                min_idx = i;
            }
        }
        index_to_bits(min_idx, self.bits_per_symbol())
    }

    /// Map a bit stream to one point per `bits_per_symbol` group.
    pub fn map_bits(&self, bits: &[bool]) -> Vec<Complex<f64>> {
        bits.chunks_exact(self.bits_per_symbol())
            .map(|group| self.map(group))
            .collect()
    }

    /// Demap a symbol stream back to a concatenated bit stream.
    pub fn demap_symbols(&self, symbols: &[Complex<f64>]) -> Vec<bool> {
        let mut bits = Vec::with_capacity(symbols.len() * self.bits_per_symbol());
        for &s in symbols {
            bits.extend(self.demap(s));
        }
        bits
    }

    #[cfg(test)]
    fn points(&self) -> &[Complex<f64>] {
        &self.points
    }
}

fn generate_bpsk() -> Vec<Complex<f64>> {
    vec![Complex::new(1.0, 0.0), Complex::new(-1.0, 0.0)]
}

fn generate_qpsk() -> Vec<Complex<f64>> {
    // Gray-coded: 00, 01, 11, 10 walk the quadrants.
    vec![
        Complex::new(1.0, 1.0),
        Complex::new(-1.0, 1.0),
        Complex::new(-1.0, -1.0),
        Complex::new(1.0, -1.0),
    ]
}

fn generate_qam(order: usize) -> Vec<Complex<f64>> {
    let size = order * order;
    let mut points = Vec::with_capacity(size);
    for i in 0..size {
        let row = i / order;
        let col = i % order;
        let gray_row = row ^ (row >> 1);
        let gray_col = col ^ (col >> 1);
        // Odd coordinates: -3, -1, 1, 3 for order 4.
        let x = (2 * gray_col) as f64 - order as f64 + 1.0;
        let y = (2 * gray_row) as f64 - order as f64 + 1.0;
        points.push(Complex::new(x, y));
    }
    points
}

fn normalize(points: &mut [Complex<f64>]) {
    let avg_power: f64 =
        points.iter().map(|p| p.norm_sqr()).sum::<f64>() / points.len() as f64;
    let scale = 1.0 / avg_power.sqrt();
    for p in points.iter_mut() {
        *p *= scale;
    }
}

fn index_to_bits(mut idx: usize, num_bits: usize) -> Vec<bool> {
    let mut bits = vec![false; num_bits];
    for i in (0..num_bits).rev() {
        bits[i] = idx & 1 == 1;
        idx >>= 1;
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_all(modulation: Modulation) {
        let c = Constellation::new(modulation);
        let bps = c.bits_per_symbol();
        for idx in 0..(1usize << bps) {
            let bits = index_to_bits(idx, bps);
            let symbol = c.map(&bits);
            let recovered = c.demap(symbol);
            assert_eq!(recovered, bits, "{modulation} index {idx}");
        }
    }

    #[test]
    fn test_bpsk_round_trip() {
        round_trip_all(Modulation::Bpsk);
    }

    #[test]
    fn test_qpsk_round_trip() {
        round_trip_all(Modulation::Qpsk);
    }

    #[test]
    fn test_qam16_round_trip() {
        round_trip_all(Modulation::Qam16);
    }

    #[test]
    fn test_qam64_round_trip() {
        round_trip_all(Modulation::Qam64);
    }

    #[test]
    fn test_unit_average_power() {
        for modulation in [
            Modulation::Bpsk,
            Modulation::Qpsk,
            Modulation::Qam16,
            Modulation::Qam64,
        ] {
            let c = Constellation::new(modulation);
            let avg: f64 = c.points().iter().map(|p| p.norm_sqr()).sum::<f64>()
                / c.points().len() as f64;
            assert!((avg - 1.0).abs() < 1e-12, "{modulation} power {avg}");
        }
    }

    #[test]
    fn test_qam16_lattice_placement() {
        // Index 0 sits at the (-3, -3) lattice corner scaled to unit power;
        // average power of the raw 16-point lattice is 10.
        let c = Constellation::new(Modulation::Qam16);
        let scale = 1.0 / 10.0f64.sqrt();
        let p0 = c.points()[0];
        assert!((p0.re + 3.0 * scale).abs() < 1e-12);
        assert!((p0.im + 3.0 * scale).abs() < 1e-12);

        // Index 1 Gray-maps column 1 to coordinate -1.
        let p1 = c.points()[1];
        assert!((p1.re + 1.0 * scale).abs() < 1e-12);
        assert!((p1.im + 3.0 * scale).abs() < 1e-12);
    }

    #[test]
    fn test_demap_midpoint_ties_to_lowest_index() {
        let c = Constellation::new(Modulation::Bpsk);
        // Exactly between +1 and -1: both distances equal, lowest index wins.
        let bits = c.demap(Complex::new(0.0, 0.0));
        assert_eq!(bits, vec![false]);
    }

    #[test]
    fn test_noisy_demap_snaps_to_nearest() {
        let c = Constellation::new(Modulation::Qam16);
        let bits = vec![true, false, true, true];
        let clean = c.map(&bits);
        let noisy = clean + Complex::new(0.05, -0.07);
        assert_eq!(c.demap(noisy), bits);
    }
}
